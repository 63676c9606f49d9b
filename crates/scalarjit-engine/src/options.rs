//! Per-compilation options

use serde::{Deserialize, Serialize};

/// Where generated code runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    /// The host CPU, through an in-process JIT module
    #[default]
    Host,
    /// Every device exposed by the configured device runtime
    Accelerator,
}

/// How hard the IR optimizer and Cranelift work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptLevel {
    None,
    #[default]
    Default,
    Aggressive,
}

impl OptLevel {
    /// Value of Cranelift's `opt_level` setting for this level
    pub fn cranelift_setting(self) -> &'static str {
        match self {
            OptLevel::None => "none",
            OptLevel::Default => "speed",
            OptLevel::Aggressive => "speed_and_size",
        }
    }
}

/// Options for one compilation
///
/// Opt level and debug mode never change the observable result of an
/// evaluation, only the shape and cost of the generated code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilationOptions {
    pub device: DeviceType,
    /// Pass literals as trailing parameters instead of embedding them
    pub hoist_literals: bool,
    pub opt_level: OptLevel,
    /// Skip IR optimization, annotate the IR and log every intermediate form
    pub debug: bool,
}

impl CompilationOptions {
    pub fn host() -> Self {
        CompilationOptions::default()
    }

    pub fn accelerator() -> Self {
        CompilationOptions { device: DeviceType::Accelerator, ..Default::default() }
    }

    pub fn with_hoist_literals(mut self, hoist: bool) -> Self {
        self.hoist_literals = hoist;
        self
    }

    pub fn with_opt_level(mut self, level: OptLevel) -> Self {
        self.opt_level = level;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }
}
