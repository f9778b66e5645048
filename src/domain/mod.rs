//! Domain model: the course map document, its schema columns, and the
//! patch/edit vocabulary used to mutate it.

mod column;
mod course_map;
mod patch;

pub use column::{Column, default_columns, humanize_key};
pub use course_map::{CourseMap, Lesson, Section};
pub use patch::{Patch, UserEdit, patches_from_value};
