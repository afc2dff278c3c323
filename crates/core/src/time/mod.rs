pub mod clock;
pub mod market_hours;
