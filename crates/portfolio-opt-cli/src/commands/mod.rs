pub mod market_data;
pub mod optimize;
