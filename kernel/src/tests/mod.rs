//! Kernel Unit Tests Module
//!
//! Cross-component scenario tests for the process core. Per-module unit
//! tests live next to the code they cover.
