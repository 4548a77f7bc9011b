pub mod compare;
pub mod distances;
pub mod plot;
pub mod run;
