//! Safer defaults for running the server against a local machine.

use std::path::Path;

use crate::config::{clean_path, Config};
use crate::sandbox::SandboxMode;

/// Apply the safe-local preset.
///
/// Always forces the default sandbox to read-only and disables yolo.
/// Workdir restriction precedence: the explicit `root` CSV, an existing
/// non-empty restriction, `$HOME`, and finally the current directory.
pub fn apply_safe_local_preset(cfg: &mut Config, root: Option<&str>) {
    cfg.security.default_sandbox = SandboxMode::ReadOnly;
    if !cfg
        .security
        .allowed_sandbox_modes
        .contains(&SandboxMode::ReadOnly)
    {
        cfg.security.allowed_sandbox_modes.push(SandboxMode::ReadOnly);
    }
    cfg.security.disable_yolo = true;

    let root = root.map(str::trim).unwrap_or_default();
    if !root.is_empty() {
        cfg.security.allowed_work_dirs = root
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect();
        return;
    }
    if !cfg.security.allowed_work_dirs.is_empty() {
        return;
    }

    match std::env::var("HOME") {
        Ok(home) if !home.trim().is_empty() => {
            cfg.security.allowed_work_dirs =
                vec![clean_path(Path::new(home.trim())).display().to_string()];
        }
        _ => {
            // Best-effort fallback: allow the current directory only.
            cfg.security.allowed_work_dirs = vec![".".to_string()];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forces_read_only_and_disables_yolo() {
        let mut cfg = Config::default();
        cfg.security.default_sandbox = SandboxMode::DangerFullAccess;
        apply_safe_local_preset(&mut cfg, None);
        assert_eq!(cfg.security.default_sandbox, SandboxMode::ReadOnly);
        assert!(cfg.security.disable_yolo);
    }

    #[test]
    fn explicit_root_wins() {
        let mut cfg = Config::default();
        cfg.security.allowed_work_dirs = vec!["/existing".into()];
        apply_safe_local_preset(&mut cfg, Some("/a, /b,"));
        assert_eq!(cfg.security.allowed_work_dirs, vec!["/a", "/b"]);
    }

    #[test]
    fn existing_restriction_is_kept() {
        let mut cfg = Config::default();
        cfg.security.allowed_work_dirs = vec!["/existing".into()];
        apply_safe_local_preset(&mut cfg, None);
        assert_eq!(cfg.security.allowed_work_dirs, vec!["/existing"]);
    }

    #[test]
    fn empty_restriction_falls_back_to_home() {
        let mut cfg = Config::default();
        apply_safe_local_preset(&mut cfg, None);
        assert_eq!(cfg.security.allowed_work_dirs.len(), 1);
        // Either $HOME or "." depending on the environment.
        assert!(!cfg.security.allowed_work_dirs[0].is_empty());
    }
}
