pub mod ease;
pub mod timeexpr;
pub mod value;
