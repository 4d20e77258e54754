use backup_core::{PassReport, SourceOutcome};
use backup_proto::proto::{PassSummary, SourceStatus, SourceSummary};

pub fn pass_summary(report: &PassReport) -> PassSummary {
    PassSummary {
        trigger: report.trigger.to_string(),
        started_at: report.started_at.to_rfc3339(),
        finished_at: report.finished_at.to_rfc3339(),
        run_folder: report.run_container.as_ref().map(|run| run.name.clone()),
        sources: report
            .sources
            .iter()
            .map(|source| SourceSummary {
                archive_name: source.archive_name.clone(),
                path: source.path.display().to_string(),
                status: match &source.outcome {
                    SourceOutcome::Uploaded {
                        object,
                        files,
                        bytes,
                    } => SourceStatus::Uploaded {
                        object_id: object.id.clone(),
                        files: *files,
                        bytes: *bytes,
                    },
                    SourceOutcome::Failed { step, error } => SourceStatus::Failed {
                        step: step.to_string(),
                        error: error.clone(),
                    },
                },
            })
            .collect(),
        aborted: report.aborted.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backup_core::{ContainerRef, ObjectRef, PassStep, SourceReport, Trigger};
    use chrono::{Local, TimeZone};

    #[test]
    fn summary_keeps_per_source_outcomes() {
        let started_at = Local.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let report = PassReport {
            trigger: Trigger::Schedule,
            started_at,
            finished_at: started_at + chrono::Duration::seconds(42),
            run_container: Some(ContainerRef {
                id: "run-1".into(),
                name: "2024-05-01 12:00:00".into(),
            }),
            sources: vec![
                SourceReport {
                    archive_name: "world.zip".into(),
                    path: "world".into(),
                    outcome: SourceOutcome::Uploaded {
                        object: ObjectRef {
                            id: "obj-1".into(),
                            name: "world.zip".into(),
                        },
                        files: 12,
                        bytes: 4096,
                    },
                },
                SourceReport {
                    archive_name: "world_nether.zip".into(),
                    path: "world_nether".into(),
                    outcome: SourceOutcome::Failed {
                        step: PassStep::Archive,
                        error: "path must be a directory: world_nether".into(),
                    },
                },
            ],
            aborted: None,
        };

        let summary = pass_summary(&report);
        assert_eq!(summary.trigger, "schedule");
        assert_eq!(summary.run_folder.as_deref(), Some("2024-05-01 12:00:00"));
        assert!(summary.started_at.starts_with("2024-05-01T12:00:00"));
        assert!(!summary.is_success());
        assert!(matches!(
            &summary.sources[0].status,
            SourceStatus::Uploaded { object_id, files: 12, bytes: 4096 } if object_id == "obj-1"
        ));
        assert!(matches!(
            &summary.sources[1].status,
            SourceStatus::Failed { step, .. } if step == "archive"
        ));
    }
}
