//! Cheap pre-check that keeps course-only pages away from the extraction oracle.

const DANCE_TERMS: &[&str] = &[
    "social dance",
    "social dancing",
    "dance party",
    "open floor",
    "party",
    "milonga",
    "salsa",
    "bachata",
    "kizomba",
    "tango",
    "swing",
    "veranstaltung",
    "event",
    "tanzparty",
    "tanzveranstaltung",
];

const COURSE_TERMS: &[&str] = &[
    "probestunde",
    "unterricht",
    "kurs",
    "workshop",
    "lesson",
    "class",
    "privatstunde",
    "einzelstunde",
    "gruppenstunde",
];

const PARTY_TERMS: &[&str] = &[
    "party",
    "social",
    "milonga",
    "practica",
    "ball",
    "veranstaltung",
];

/// How far (in bytes) around a course term party vocabulary still counts as context.
const PROXIMITY: usize = 60;

pub fn is_relevant(text: &str) -> bool {
    let lower = text.to_lowercase();

    for term in COURSE_TERMS {
        for (pos, _) in lower.match_indices(term) {
            if !party_nearby(&lower, pos, term.len()) {
                return false;
            }
        }
    }

    DANCE_TERMS.iter().any(|term| lower.contains(term))
}

fn party_nearby(text: &str, pos: usize, len: usize) -> bool {
    let start = floor_boundary(text, pos.saturating_sub(PROXIMITY));
    let end = ceil_boundary(text, (pos + len + PROXIMITY).min(text.len()));
    let window = &text[start..end];
    PARTY_TERMS.iter().any(|term| window.contains(term))
}

fn floor_boundary(text: &str, mut index: usize) -> usize {
    while !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

fn ceil_boundary(text: &str, mut index: usize) -> usize {
    while !text.is_char_boundary(index) {
        index += 1;
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_party_pages() {
        assert!(is_relevant("Salsa Party jeden Freitag im Havanna Club"));
        assert!(is_relevant("Große Tanzveranstaltung mit Bachata und Kizomba"));
    }

    #[test]
    fn rejects_course_only_pages() {
        assert!(!is_relevant(
            "Salsa Kurs für Anfänger. Anmeldung zur Probestunde hier."
        ));
    }

    #[test]
    fn course_with_party_context_passes() {
        assert!(is_relevant("Workshop um 20 Uhr, danach Salsa Party bis 2 Uhr"));
    }

    #[test]
    fn party_far_from_course_term_does_not_count() {
        let filler = "lorem ipsum ".repeat(20);
        let text = format!("Salsa Unterricht dienstags. {filler} Sommerfest mit Party");
        assert!(!is_relevant(&text));
    }

    #[test]
    fn unrelated_pages_are_rejected() {
        assert!(!is_relevant("Öffnungszeiten der Stadtbibliothek Köln"));
    }

    #[test]
    fn multibyte_text_around_terms_is_safe() {
        let text = format!("{}kurs{} Party", "ü".repeat(40), "ß".repeat(40));
        assert!(!is_relevant(&text));
    }
}
