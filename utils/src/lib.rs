// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! # twoslot-utils
//!
//! Small helpers shared by the twoslot test-suites.

pub mod random;
