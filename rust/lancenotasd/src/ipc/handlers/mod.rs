pub mod assignments;
pub mod calc;
pub mod classes;
pub mod closing;
pub mod core;
pub mod dashboard;
pub mod grades;
pub mod roster;
pub mod settings;
