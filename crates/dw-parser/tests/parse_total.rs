//! Parser totality: `parse`/`recognize` must never panic, whatever the input,
//! and canonical serialisations of accepted commands must re-parse to the
//! same command where the grammar is round-trippable.

use proptest::prelude::*;

proptest! {
    #[test]
    fn parse_never_panics(s in "\\PC*") {
        let _ = dw_parser::parse(&s);
        let _ = dw_parser::recognize(&s);
    }

    #[test]
    fn recognize_is_consistent_with_parse_on_dw_lines(body in "[ -~]{0,60}") {
        let line = format!("DW {body}");
        // A DW-prefixed line is always recognised as a command attempt…
        let rec = dw_parser::recognize(&line);
        prop_assert!(rec.is_some());
        // …and recognise/parse agree on whether it is well-formed.
        prop_assert_eq!(rec.unwrap().is_ok(), dw_parser::parse(&line).is_ok());
    }

    #[test]
    fn quorum_accepts_exactly_positive_integers(n in -1000i64..1000) {
        let res = dw_parser::parse(&format!("DW QUORUM {n}"));
        prop_assert_eq!(res.is_ok(), n > 0);
    }
}
