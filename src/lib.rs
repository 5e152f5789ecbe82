pub mod config {
    pub mod settings;
}
pub mod services {
    pub mod advisory;
    pub mod backtest;
    pub mod market_data;
    pub mod progress;
    pub mod scheduler;
    pub mod trading_engine;

    pub mod risk;

    pub mod strategies {
        pub mod common;
        pub use common::{Candle, Interval, OrderLeg, OrderPlan, Side};
        pub mod order_point;
        pub mod support_break;
        pub mod swing;
    }
}

pub mod utils {
    pub mod errors;
    pub mod rounding;
}
