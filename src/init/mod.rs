// SPDX-License-Identifier: Apache-2.0

pub mod agent;
pub mod args;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;
