//! Build collaborator: configure, compile and install a checkout.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::info;

use crate::command::run_checked;
use crate::Result;

/// Build tuning passed explicitly into every build call.
///
/// Nothing here is read from or written to the harness's own process
/// environment; compiler-cache settings only reach the child processes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildOptions {
    /// Skip building bundled test suites.
    pub disable_tests: bool,
    /// Skip language bindings the benchmark never loads.
    pub disable_bindings: bool,
    /// Route compiler invocations through ccache.
    pub compiler_cache: bool,
    /// Parallel make jobs.
    pub jobs: usize,
    /// Extra arguments appended to `./configure`.
    pub extra_configure_args: Vec<String>,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            disable_tests: true,
            disable_bindings: true,
            compiler_cache: false,
            jobs: 8,
            extra_configure_args: Vec::new(),
        }
    }
}

const DISABLE_TESTS_FLAGS: &[&str] = &["--disable-broker-tests"];
const DISABLE_BINDINGS_FLAGS: &[&str] = &["--disable-python", "--disable-broccoli"];

impl BuildOptions {
    /// Full `./configure` argument list for an install prefix.
    pub fn configure_args(&self, install_path: &Path) -> Vec<String> {
        let mut args = vec![format!("--prefix={}", install_path.display())];
        if self.disable_tests {
            args.extend(DISABLE_TESTS_FLAGS.iter().map(|s| s.to_string()));
        }
        if self.disable_bindings {
            args.extend(DISABLE_BINDINGS_FLAGS.iter().map(|s| s.to_string()));
        }
        args.extend(self.extra_configure_args.iter().cloned());
        args
    }

    /// Environment for build child processes.
    pub fn child_env(&self) -> Vec<(&'static str, &'static str)> {
        if self.compiler_cache {
            vec![
                ("CMAKE_C_COMPILER_LAUNCHER", "ccache"),
                ("CMAKE_CXX_COMPILER_LAUNCHER", "ccache"),
            ]
        } else {
            Vec::new()
        }
    }
}

/// Build collaborator.
///
/// `configure` targets the install prefix; `compile_and_install` must leave
/// either a complete installed binary or none at all.
#[async_trait]
pub trait BuildTool: Send + Sync {
    /// Configure the checkout to install into `install_path`.
    async fn configure(&self, install_path: &Path, options: &BuildOptions) -> Result<()>;

    /// Compile and install the configured checkout.
    async fn compile_and_install(&self, options: &BuildOptions) -> Result<()>;
}

/// `./configure && make && make install` in a source directory.
#[derive(Debug, Clone)]
pub struct AutotoolsBuild {
    source_dir: PathBuf,
}

impl AutotoolsBuild {
    pub fn new(source_dir: impl Into<PathBuf>) -> Self {
        Self {
            source_dir: source_dir.into(),
        }
    }

    fn command(&self, program: &str, options: &BuildOptions) -> Command {
        let mut cmd = Command::new(program);
        cmd.current_dir(&self.source_dir).envs(options.child_env());
        cmd
    }
}

#[async_trait]
impl BuildTool for AutotoolsBuild {
    async fn configure(&self, install_path: &Path, options: &BuildOptions) -> Result<()> {
        info!(prefix = %install_path.display(), "configuring");
        let mut cmd = self.command("./configure", options);
        cmd.args(options.configure_args(install_path));
        run_checked(cmd).await?;
        Ok(())
    }

    async fn compile_and_install(&self, options: &BuildOptions) -> Result<()> {
        info!(jobs = options.jobs, "compiling");
        let mut make = self.command("make", options);
        make.arg(format!("-j{}", options.jobs.max(1)));
        run_checked(make).await?;

        let mut install = self.command("make", options);
        install.arg("install");
        run_checked(install).await?;
        Ok(())
    }
}
