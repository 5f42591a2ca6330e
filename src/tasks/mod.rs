pub mod live_refresh;
