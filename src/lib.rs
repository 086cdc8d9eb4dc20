#![doc = include_str!("../README.md")]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

mod compression;
mod conn;
mod control;
mod jobs;
mod monitor;
mod pool;
mod prepare;
mod request;
mod retry;
mod rows;
mod session;
mod timeout;
mod topology;

pub mod config;
pub mod error;
pub mod event;
pub mod policy;
pub mod types;

pub use crate::{
    config::ClusterConfig,
    error::{Error, ErrorKind, Result, ServerErrorKind},
    event::{ConnectionClosedReason, ConnectionEvent, EventHandler, PoolEvent, TopologyEvent},
    policy::{LoadBalancingPolicy, PolicyFactory},
    request::Request,
    session::{Response, Session},
    types::{Consistency, Host, HostEvent, ProtocolVersion},
};
