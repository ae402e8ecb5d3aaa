pub mod datetime;
pub mod name_match;
