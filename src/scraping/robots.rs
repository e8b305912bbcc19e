//! robots.txt evaluation. A missing or unreachable robots.txt means everything is allowed.

use std::time::Duration;

use reqwest::Url;

use super::base::PageFetcher;

#[derive(Debug, Default, Clone)]
struct Group {
    agents: Vec<String>,
    rules: Vec<Rule>,
}

#[derive(Debug, Clone)]
struct Rule {
    allow: bool,
    pattern: String,
}

#[derive(Debug, Default, Clone)]
pub struct RobotsTxt {
    groups: Vec<Group>,
}

impl RobotsTxt {
    pub fn parse(body: &str) -> Self {
        let mut groups: Vec<Group> = Vec::new();
        let mut current = Group::default();
        let mut in_rules = false;

        for raw in body.lines() {
            let line = raw.split('#').next().unwrap_or("").trim();
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim().to_ascii_lowercase();
            let value = value.trim();

            match key.as_str() {
                "user-agent" => {
                    if in_rules {
                        groups.push(std::mem::take(&mut current));
                        in_rules = false;
                    }
                    current.agents.push(value.to_ascii_lowercase());
                }
                "allow" | "disallow" => {
                    in_rules = true;
                    // An empty Disallow allows everything.
                    if value.is_empty() {
                        continue;
                    }
                    current.rules.push(Rule {
                        allow: key == "allow",
                        pattern: value.to_string(),
                    });
                }
                _ => {}
            }
        }
        if !current.agents.is_empty() {
            groups.push(current);
        }

        Self { groups }
    }

    /// Evaluates `path` (path plus query) for `user_agent` using longest-match precedence.
    pub fn is_allowed(&self, user_agent: &str, path: &str) -> bool {
        let token = product_token(user_agent);
        let specific: Vec<&Group> = self
            .groups
            .iter()
            .filter(|group| {
                group
                    .agents
                    .iter()
                    .any(|agent| agent != "*" && token.starts_with(agent.as_str()))
            })
            .collect();
        let groups = if specific.is_empty() {
            self.groups
                .iter()
                .filter(|group| group.agents.iter().any(|agent| agent == "*"))
                .collect()
        } else {
            specific
        };

        let mut best: Option<&Rule> = None;
        for rule in groups.iter().flat_map(|group| group.rules.iter()) {
            if !pattern_matches(&rule.pattern, path) {
                continue;
            }
            best = match best {
                None => Some(rule),
                Some(prev) if rule.pattern.len() > prev.pattern.len() => Some(rule),
                Some(prev) if rule.pattern.len() == prev.pattern.len() && rule.allow => Some(rule),
                keep => keep,
            };
        }
        best.map(|rule| rule.allow).unwrap_or(true)
    }
}

fn product_token(user_agent: &str) -> String {
    user_agent
        .split(['/', ' '])
        .next()
        .unwrap_or("")
        .to_ascii_lowercase()
}

/// Matches a robots pattern supporting `*` wildcards and a trailing `$` anchor.
fn pattern_matches(pattern: &str, path: &str) -> bool {
    let (pattern, anchored) = match pattern.strip_suffix('$') {
        Some(stripped) => (stripped, true),
        None => (pattern, false),
    };
    let pieces: Vec<&str> = pattern.split('*').collect();
    let mut rest = path;

    for (i, piece) in pieces.iter().enumerate() {
        if i == 0 {
            match rest.strip_prefix(piece) {
                Some(tail) => rest = tail,
                None => return false,
            }
            continue;
        }
        if i == pieces.len() - 1 && anchored {
            return rest.ends_with(piece);
        }
        match rest.find(piece) {
            Some(pos) => rest = &rest[pos + piece.len()..],
            None => return false,
        }
    }

    !anchored || rest.is_empty()
}

/// Fetches `<origin>/robots.txt` and evaluates `url`; any fetch problem counts as permission.
pub async fn is_allowed_by_robots(
    fetcher: &dyn PageFetcher,
    url: &str,
    user_agent: &str,
    timeout: Duration,
) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return true;
    };
    let robots_url = format!("{}/robots.txt", parsed.origin().ascii_serialization());
    let body = match fetcher.get(&robots_url, timeout).await {
        Ok(body) => body,
        Err(err) => {
            tracing::debug!(%robots_url, "robots.txt unavailable, allowing: {err}");
            return true;
        }
    };

    let mut path = parsed.path().to_string();
    if let Some(query) = parsed.query() {
        path.push('?');
        path.push_str(query);
    }
    RobotsTxt::parse(&body).is_allowed(user_agent, &path)
}
