#![feature(portable_simd)]
#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]
pub mod batch;
pub mod config;
pub mod decide;
pub mod io;
pub mod kernel;
pub mod locator;
pub mod pipeline;
pub mod prepare;
pub mod types;
