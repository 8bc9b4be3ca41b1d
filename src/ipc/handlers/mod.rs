pub mod core;
pub mod grid;
pub mod paste;
pub mod setup;
pub mod skills;
pub mod students;
pub mod subjects;
