//! Image generation orchestrator
//!
//! This library drives a remote ComfyUI rendering service: it admits at most
//! a configured number of jobs at a time, submits a templated job graph,
//! polls for completion under a bounded budget and stores the produced
//! image locally under the name the service assigned it.

pub mod app_state;
pub mod config;
pub mod models;
pub mod routes;
pub mod services;
