//! The partial-JSON reconciler against streaming prefixes: totality over
//! arbitrary cuts and monotonic growth of the recovered document.

use proptest::prelude::*;
use serde_json::json;

use coursemap::domain::CourseMap;
use coursemap::infra::reconcile::{reconcile, reconcile_course_map};

const FULL_DOC: &str = r#"{"courseName": "Intro to Biology", "semester": "FA26", "lessons": [
  {"title": "Week 1: Cells", "sections": [
    {"learningGoals": "Understand cell structure", "topicSection": "1.1: The Cell"},
    {"learningGoals": "Compare cell types", "topicSection": "1.2: Prokaryotes"}
  ]},
  {"title": "Week 2: Genetics", "sections": [
    {"learningGoals": "Explain inheritance", "topicSection": "2.1: Mendel"}
  ]}
]}"#;

#[test]
fn every_prefix_is_handled_without_panicking() {
    for cut in 0..=FULL_DOC.len() {
        if !FULL_DOC.is_char_boundary(cut) {
            continue;
        }
        // Some prefixes are unrepairable (e.g. ending on a dangling
        // comma); those must yield None, never an error.
        let _ = reconcile(&FULL_DOC[..cut]);
    }
}

#[test]
fn recovered_lesson_count_never_shrinks_as_the_stream_grows() {
    let mut max_lessons = 0;
    let mut max_sections = 0;
    for cut in 0..=FULL_DOC.len() {
        if !FULL_DOC.is_char_boundary(cut) {
            continue;
        }
        if let Some(map) = reconcile_course_map(&FULL_DOC[..cut]) {
            assert!(map.lessons.len() >= max_lessons, "lessons shrank at cut {cut}");
            max_lessons = map.lessons.len();
            let sections: usize = map.lessons.iter().map(|l| l.sections.len()).sum();
            assert!(sections >= max_sections, "sections shrank at cut {cut}");
            max_sections = sections;
        }
    }
    assert_eq!(max_lessons, 2);
    assert_eq!(max_sections, 3);
}

#[test]
fn full_document_round_trips_exactly() {
    let map = reconcile_course_map(FULL_DOC).unwrap();
    let expected: CourseMap = serde_json::from_str(FULL_DOC).unwrap();
    assert_eq!(map, expected);
}

#[test]
fn mid_string_cut_keeps_the_partial_cell_text() {
    let cut = FULL_DOC.find("cell structure").unwrap() + "cell str".len();
    let map = reconcile_course_map(&FULL_DOC[..cut]).unwrap();
    assert_eq!(map.lessons[0].sections[0].text("learningGoals"), "Understand cell str");
}

fn cell_text() -> impl Strategy<Value = String> {
    "[A-Za-z0-9 .:,']{0,40}"
}

proptest! {
    // Documents built from brace-free cell text recover at every prefix
    // that parses, and the full text always parses.
    #[test]
    fn random_documents_survive_random_cuts(
        lessons in prop::collection::vec(
            (cell_text(), prop::collection::vec(cell_text(), 0..4)),
            1..4,
        ),
        step in 1usize..7,
    ) {
        let doc = json!({
            "courseName": "C",
            "semester": "S",
            "lessons": lessons.iter().map(|(title, cells)| json!({
                "title": title,
                "sections": cells.iter().map(|c| json!({"topicSection": c})).collect::<Vec<_>>(),
            })).collect::<Vec<_>>(),
        })
        .to_string();

        prop_assert!(reconcile_course_map(&doc).is_some());

        let mut max_lessons = 0;
        let mut cut = 0;
        while cut <= doc.len() {
            if doc.is_char_boundary(cut)
                && let Some(map) = reconcile_course_map(&doc[..cut])
            {
                prop_assert!(map.lessons.len() >= max_lessons);
                max_lessons = map.lessons.len();
            }
            cut += step;
        }
        prop_assert!(reconcile_course_map(&doc).unwrap().lessons.len() == lessons.len());
    }
}
