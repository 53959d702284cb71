pub mod clear;
pub mod inspect;
pub mod run;
pub mod worker;

pub use clear::clear;
pub use inspect::{list, status, stop};
pub use run::run;
pub use worker::worker;
