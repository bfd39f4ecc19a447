mod app;
mod event;

pub use app::app;
