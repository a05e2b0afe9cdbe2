/*
SPDX-License-Identifier: MIT
*/

//! gridctld — cluster workload manager controller core.
//!
//! Module layout:
//!
//! ```text
//! lib.rs
//! ├── error         – structured error taxonomy
//! ├── model         – nodes, partitions, jobs, steps
//! ├── assoc         – hierarchical accounting association tree
//! ├── config        – cluster topology YAML loader
//! ├── accounting    – resource accounting map (per-node job/step counts)
//! ├── reservation   – reservation CRUD + binary persistence
//! ├── selector      – node-selection plugins (linear, 3D torus)
//! ├── lifecycle     – job/step state machine
//! ├── plugin        – SPANK-style hook stack
//! ├── notifier      – controller-to-client fan-out
//! ├── multiprog     – multi-program task layout parsing
//! ├── checkpoint    – checkpoint/suspend/resume op surface
//! ├── pidfile       – daemon pidfile primitive
//! └── controller    – composition root wiring every component together
//! ```

pub mod accounting;
pub mod assoc;
pub mod checkpoint;
pub mod config;
pub mod controller;
pub mod error;
pub mod lifecycle;
pub mod model;
pub mod multiprog;
pub mod notifier;
pub mod pidfile;
pub mod plugin;
pub mod reservation;
pub mod selector;
