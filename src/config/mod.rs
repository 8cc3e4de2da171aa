pub mod ticker;

pub use ticker::TickerConfig;
