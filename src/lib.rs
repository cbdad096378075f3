pub mod chart;
pub mod config;
pub mod data;
pub mod event;
pub mod feed;
pub mod filter;
pub mod grouping;
pub mod html;
pub mod logging;
pub mod nav;
pub mod proxy;
pub mod render;
pub mod storage;
pub mod timeline;
