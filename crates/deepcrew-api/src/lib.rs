//! HTTP surface of DeepCrew: a JSON research endpoint, a server-sent-event
//! stream of status events and a health check.

pub mod error;
pub mod routes;
pub mod state;
