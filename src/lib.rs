// Copyright 2026 The Parapet Project
// SPDX-License-Identifier: Apache-2.0

pub mod config;
pub mod engine;
pub mod filter;
pub mod message;
pub mod proxy;
pub mod registry;
pub mod sink;
pub mod stream;
pub mod upstream;
