pub mod descriptor;
pub mod installer;
pub mod launcher;
pub mod metadata;
pub mod rules;
