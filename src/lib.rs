//! Client for the BEFA academy API: content hub, players, training schedule
//! and store, with a durable TTL cache for instant offline reads and a live
//! comment channel.

pub mod api;
pub mod app;
pub mod cache;
pub mod commands;
pub mod config;
pub mod event;
pub mod live;
pub mod logging;
pub mod stores;
pub mod sync;
