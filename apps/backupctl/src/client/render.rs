use std::fmt::Write;

use backup_proto::proto::{BackupStatus, DaemonStatus, PassSummary, SourceStatus};

pub fn status(daemon: &DaemonStatus, backups: &BackupStatus) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "daemon: v{} pid={} up={}s",
        daemon.daemon_version,
        daemon.pid,
        daemon.uptime_ms / 1000
    );

    let state = match (backups.enabled, backups.running) {
        (false, _) => "disabled",
        (true, true) => "running",
        (true, false) => "idle",
    };
    let _ = writeln!(
        out,
        "backups: {state} root={} every {}",
        backups.root_name,
        human_period(backups.period_secs)
    );
    if let Some(reason) = &backups.disabled_reason {
        let _ = writeln!(out, "  reason: {reason}");
    }

    match &backups.last_pass {
        Some(pass) => out.push_str(&summary(pass)),
        None => out.push_str("last pass: none\n"),
    }
    out
}

pub fn summary(pass: &PassSummary) -> String {
    let mut out = String::new();
    let verdict = if pass.is_success() { "ok" } else { "with failures" };
    let _ = writeln!(
        out,
        "last pass ({}): {verdict}, {} -> {}",
        pass.trigger, pass.started_at, pass.finished_at
    );
    if let Some(folder) = &pass.run_folder {
        let _ = writeln!(out, "  folder: {folder}");
    }
    if let Some(reason) = &pass.aborted {
        let _ = writeln!(out, "  aborted: {reason}");
    }
    for source in &pass.sources {
        match &source.status {
            SourceStatus::Uploaded { files, bytes, .. } => {
                let _ = writeln!(
                    out,
                    "  {}: uploaded {files} files, {bytes} bytes",
                    source.archive_name
                );
            }
            SourceStatus::Failed { step, error } => {
                let _ = writeln!(out, "  {}: {step} failed: {error}", source.archive_name);
            }
        }
    }
    out
}

fn human_period(secs: u64) -> String {
    match secs {
        s if s % 3600 == 0 => format!("{}h", s / 3600),
        s if s % 60 == 0 => format!("{}m", s / 60),
        s => format!("{s}s"),
    }
}
