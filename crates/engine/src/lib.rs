pub mod clock;
pub mod formatter;
pub mod lock;
pub mod matcher;
pub mod reporter;
pub mod repository;
pub mod runner;
