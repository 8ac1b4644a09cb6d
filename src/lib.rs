// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

pub mod accounts;
pub mod auth;
pub mod captcha;
pub mod config;
pub mod connection_registry;
pub mod envelope;
pub mod error;
pub mod freshness;
pub mod handler;
pub mod http;
pub mod hub;
pub mod metrics;
pub mod pending;
pub mod presence;
pub mod proof_of_work;
pub mod protocol;
pub mod rate_limit;
pub mod replay;
pub mod router;
pub mod services;
pub mod signature;
