#![recursion_limit = "256"]

pub mod boxes;
pub mod config;
pub mod data;
pub mod dataset;
pub mod error;
pub mod inference;
pub mod layers;
pub mod loss;
pub mod models;
pub mod multibox;
pub mod nms;
pub mod stats;
pub mod training;
pub mod transforms;
pub mod voc;

#[cfg(test)]
pub mod debug;
