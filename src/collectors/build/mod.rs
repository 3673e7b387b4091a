use crate::collectors::metric_list::to_f64;
use crate::collectors::{CollectContext, Labels, MetricList, Processor, Publisher};
use crate::devops::BuildFilter;
use crate::devops::models::{Build, Project, Timeline};
use crate::labels;
use anyhow::Result;
use chrono::Utc;
use futures::future::BoxFuture;
use futures::stream::{self, StreamExt};
use prometheus::{GaugeVec, Opts, Registry};
use tracing::{debug, instrument, warn};

const TIMELINE_LABELS: &[&str] = &[
    "projectID",
    "buildID",
    "buildDefinitionID",
    "buildNumber",
    "name",
    "id",
    "parentID",
    "result",
    "type",
];

/// Builds queued within the build history window, their definitions and
/// the stage/phase/job/task timeline of every finished build.
#[derive(Clone)]
pub struct BuildCollector {
    build_info: GaugeVec,
    build_status: GaugeVec,
    build_definition_info: GaugeVec,
    build_stage: GaugeVec,
    build_phase: GaugeVec,
    build_job: GaugeVec,
    build_task: GaugeVec,
}

/// Label names shared by `build_info` and `build_latest_info`.
pub(crate) const BUILD_INFO_LABELS: &[&str] = &[
    "projectID",
    "buildDefinitionID",
    "buildID",
    "agentPoolID",
    "requestedBy",
    "buildNumber",
    "buildName",
    "sourceBranch",
    "sourceVersion",
    "status",
    "reason",
    "result",
    "url",
];

/// Label names shared by `build_status` and `build_latest_status`.
pub(crate) const BUILD_STATUS_LABELS: &[&str] = &[
    "projectID",
    "buildID",
    "buildDefinitionID",
    "buildNumber",
    "result",
    "type",
];

pub(crate) fn build_info_labels(project: &Project, build: &Build) -> Labels {
    labels!(
        "projectID" => project.id,
        "buildDefinitionID" => build.definition.id,
        "buildID" => build.id,
        "agentPoolID" => build.queue.pool.id,
        "requestedBy" => build.requested_by.display_name,
        "buildNumber" => build.build_number,
        "buildName" => build.definition.name,
        "sourceBranch" => build.source_branch,
        "sourceVersion" => build.source_version,
        "status" => build.status,
        "reason" => build.reason,
        "result" => build.result,
        "url" => build.links.web.href,
    )
}

/// Timestamps, job duration and success of one build.
pub(crate) fn add_build_status(status: &mut MetricList, project: &Project, build: &Build) {
    let ids = labels!(
        "projectID" => project.id,
        "buildID" => build.id,
        "buildDefinitionID" => build.definition.id,
        "buildNumber" => build.build_number,
        "result" => build.result,
    );

    status.add_time(ids.with("type", "queued"), build.queue_time);
    status.add_time(ids.with("type", "started"), build.start_time);
    status.add_time(ids.with("type", "finished"), build.finish_time);

    if build.finish_time.is_some() {
        if let Some(duration) = build.job_duration() {
            status.add_duration(ids.with("type", "jobDuration"), duration);
        }
        status.add_bool(ids.with("type", "succeeded"), build.result == "succeeded");
    }
}

impl BuildCollector {
    #[must_use]
    #[allow(clippy::expect_used)]
    ///
    /// # Panics
    ///
    /// Panics if metric creation fails.
    pub fn new() -> Self {
        let gvec = |name: &str, help: &str, labels: &[&str]| {
            GaugeVec::new(Opts::new(name, help), labels).expect("valid build metric")
        };

        Self {
            build_info: gvec("azure_devops_build_info", "Azure DevOps build", BUILD_INFO_LABELS),
            build_status: gvec(
                "azure_devops_build_status",
                "Azure DevOps build timestamps and results",
                BUILD_STATUS_LABELS,
            ),
            build_definition_info: gvec(
                "azure_devops_build_definition_info",
                "Azure DevOps build definition",
                &[
                    "projectID",
                    "buildDefinitionID",
                    "buildNameFormat",
                    "buildDefinitionName",
                    "path",
                    "url",
                ],
            ),
            build_stage: gvec(
                "azure_devops_build_stage",
                "Azure DevOps build stages",
                TIMELINE_LABELS,
            ),
            build_phase: gvec(
                "azure_devops_build_phase",
                "Azure DevOps build phases",
                TIMELINE_LABELS,
            ),
            build_job: gvec("azure_devops_build_job", "Azure DevOps build jobs", TIMELINE_LABELS),
            build_task: gvec(
                "azure_devops_build_task",
                "Azure DevOps build tasks",
                TIMELINE_LABELS,
            ),
        }
    }
}

impl Default for BuildCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Default)]
struct TimelineLists {
    stage: MetricList,
    phase: MetricList,
    job: MetricList,
    task: MetricList,
}

impl TimelineLists {
    fn for_type(&mut self, record_type: &str) -> Option<&mut MetricList> {
        match record_type {
            "Stage" => Some(&mut self.stage),
            "Phase" => Some(&mut self.phase),
            "Job" => Some(&mut self.job),
            "Task" => Some(&mut self.task),
            _ => None,
        }
    }

    fn add(&mut self, project: &Project, build: &Build, timeline: &Timeline) {
        for record in &timeline.records {
            let Some(list) = self.for_type(&record.record_type) else {
                continue;
            };
            let result = record.result.clone().unwrap_or_default();
            let ids = labels!(
                "projectID" => project.id,
                "buildID" => build.id,
                "buildDefinitionID" => build.definition.id,
                "buildNumber" => build.build_number,
                "name" => record.name,
                "id" => record.id,
                "parentID" => record.parent_id.clone().unwrap_or_default(),
                "result" => result,
            );

            list.add(ids.with("type", "errorCount"), to_f64(record.error_count));
            list.add(ids.with("type", "warningCount"), to_f64(record.warning_count));
            list.add_time(ids.with("type", "started"), record.start_time);
            list.add_time(ids.with("type", "finished"), record.finish_time);
            if let (Some(start), Some(finish)) = (record.start_time, record.finish_time) {
                list.add_duration(ids.with("type", "duration"), finish - start);
            }
            if record.finish_time.is_some() {
                list.add_bool(ids.with("type", "succeeded"), result == "succeeded");
            }
        }
    }
}

impl Processor for BuildCollector {
    type Unit = Project;

    fn name(&self) -> &'static str {
        "build"
    }

    #[instrument(skip(self, registry), level = "info", err, fields(collector = "build"))]
    fn register_metrics(&self, registry: &Registry) -> Result<()> {
        registry.register(Box::new(self.build_info.clone()))?;
        registry.register(Box::new(self.build_status.clone()))?;
        registry.register(Box::new(self.build_definition_info.clone()))?;
        registry.register(Box::new(self.build_stage.clone()))?;
        registry.register(Box::new(self.build_phase.clone()))?;
        registry.register(Box::new(self.build_job.clone()))?;
        registry.register(Box::new(self.build_task.clone()))?;
        Ok(())
    }

    fn reset(&self) {
        self.build_info.reset();
        self.build_status.reset();
        self.build_definition_info.reset();
        self.build_stage.reset();
        self.build_phase.reset();
        self.build_job.reset();
        self.build_task.reset();
    }

    #[instrument(skip_all, level = "info", err, fields(collector = "build", otel.kind = "internal"))]
    fn collect<'a>(
        &'a self,
        ctx: &'a CollectContext,
        project: &'a Project,
        publisher: &'a Publisher,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let definitions = ctx.api.list_build_definitions(&project.id).await?;

            let mut definition_info = MetricList::new();
            for definition in &definitions {
                definition_info.add_info(labels!(
                    "projectID" => project.id,
                    "buildDefinitionID" => definition.id,
                    "buildNameFormat" => definition.build_number_format,
                    "buildDefinitionName" => definition.name,
                    "path" => definition.path,
                    "url" => definition.links.web.href,
                ));
            }

            let filter = BuildFilter {
                min_time: Utc::now().checked_sub_signed(ctx.settings.build_history),
                finished_only: false,
            };
            let builds = ctx.api.list_builds(&project.id, &filter).await?;

            let mut info = MetricList::new();
            let mut status = MetricList::new();
            for build in &builds {
                info.add_info(build_info_labels(project, build));
                add_build_status(&mut status, project, build);
            }

            let fetches: Vec<_> = builds
                .iter()
                .filter(|b| b.finish_time.is_some())
                .map(|build| async move {
                    (build, ctx.api.get_build_timeline(&project.id, build.id).await)
                })
                .collect();
            let outcomes: Vec<_> = stream::iter(fetches)
                .buffer_unordered(ctx.settings.fanout.max(1))
                .collect()
                .await;

            // A missing timeline drops only that build's records.
            let mut records = TimelineLists::default();
            let mut timelines = 0;
            for (build, outcome) in outcomes {
                match outcome {
                    Ok(timeline) => {
                        records.add(project, build, &timeline);
                        timelines += 1;
                    }
                    Err(err) => warn!(
                        project = %project.name,
                        build = build.id,
                        "skipping build timeline: {err}"
                    ),
                }
            }

            debug!(
                project = %project.name,
                builds = builds.len(),
                timelines,
                "collected builds"
            );

            publisher.gauge(definition_info, &self.build_definition_info);
            publisher.gauge(info, &self.build_info);
            publisher.gauge(status, &self.build_status);
            publisher.gauge(records.stage, &self.build_stage);
            publisher.gauge(records.phase, &self.build_phase);
            publisher.gauge(records.job, &self.build_job);
            publisher.gauge(records.task, &self.build_task);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::testing::{context, find, publish_unit, registry_for, samples, value};
    use crate::devops::mock::MockApi;
    use crate::devops::models::{BuildDefinition, DefinitionRef, TimelineRecord};
    use chrono::{DateTime, TimeDelta};
    use std::sync::Arc;

    fn at(seconds: i64) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(1_700_000_000 + seconds, 0)
    }

    fn build(id: i64, status: &str, result: &str, finished: bool) -> Build {
        Build {
            id,
            build_number: format!("2024.{id}"),
            status: status.to_string(),
            result: result.to_string(),
            definition: DefinitionRef {
                id: 10,
                name: "ci".to_string(),
                path: "\\".to_string(),
            },
            queue_time: at(0),
            start_time: at(30),
            finish_time: if finished { at(90) } else { None },
            ..Build::default()
        }
    }

    fn project() -> Project {
        Project {
            id: "P1".to_string(),
            name: "P1".to_string(),
            ..Project::default()
        }
    }

    fn mock() -> MockApi {
        let mut api = MockApi::new();
        api.builds.insert(
            "P1".to_string(),
            vec![
                build(1, "completed", "succeeded", true),
                build(2, "completed", "failed", true),
                build(3, "inProgress", "", false),
            ],
        );
        api
    }

    #[tokio::test]
    #[allow(clippy::unwrap_used)]
    async fn test_build_scenario() {
        let api = Arc::new(mock());
        let mut ctx = context(Arc::clone(&api));
        ctx.settings = Arc::new(crate::collectors::Settings {
            build_history: TimeDelta::minutes(2),
            ..crate::collectors::Settings::default()
        });
        let collector = BuildCollector::new();
        let registry = registry_for(&collector);

        publish_unit(&collector, &ctx, &project()).await.unwrap();

        assert_eq!(samples(&registry, "azure_devops_build_info").len(), 3);

        let job_durations = find(&registry, "azure_devops_build_status", &[("type", "jobDuration")]);
        let mut with_duration: Vec<&str> = job_durations.iter().map(|s| s.label("buildID")).collect();
        with_duration.sort_unstable();
        assert_eq!(with_duration, vec!["1", "2"]);
        assert!(job_durations.iter().all(|s| (s.value - 60.0).abs() < f64::EPSILON));

        assert_eq!(
            value(&registry, "azure_devops_build_status", &[("buildID", "1"), ("type", "succeeded")]),
            Some(1.0)
        );
        assert_eq!(
            value(&registry, "azure_devops_build_status", &[("buildID", "2"), ("type", "succeeded")]),
            Some(0.0)
        );
        assert!(find(&registry, "azure_devops_build_status", &[("buildID", "3"), ("type", "finished")]).is_empty());
        assert_eq!(
            find(&registry, "azure_devops_build_status", &[("buildID", "3"), ("type", "started")]).len(),
            1
        );

        // One definitions call, one builds call, two timelines.
        assert_eq!(api.calls(), 4);
    }

    #[tokio::test]
    #[allow(clippy::unwrap_used)]
    async fn test_definitions_and_timeline() {
        let mut api = mock();
        api.definitions.insert(
            "P1".to_string(),
            vec![BuildDefinition {
                id: 10,
                name: "ci".to_string(),
                path: "\\team".to_string(),
                build_number_format: "$(Date:yyyyMMdd)$(Rev:.r)".to_string(),
                ..BuildDefinition::default()
            }],
        );
        api.timelines.insert(
            1,
            Timeline {
                id: "t1".to_string(),
                records: vec![
                    TimelineRecord {
                        id: "s1".to_string(),
                        record_type: "Stage".to_string(),
                        name: "Build".to_string(),
                        result: Some("succeeded".to_string()),
                        warning_count: 2,
                        start_time: at(30),
                        finish_time: at(80),
                        ..TimelineRecord::default()
                    },
                    TimelineRecord {
                        id: "k1".to_string(),
                        parent_id: Some("s1".to_string()),
                        record_type: "Task".to_string(),
                        name: "compile".to_string(),
                        start_time: at(40),
                        ..TimelineRecord::default()
                    },
                    TimelineRecord {
                        id: "c1".to_string(),
                        record_type: "Checkpoint".to_string(),
                        ..TimelineRecord::default()
                    },
                ],
            },
        );
        let ctx = context(Arc::new(api));
        let collector = BuildCollector::new();
        let registry = registry_for(&collector);

        publish_unit(&collector, &ctx, &project()).await.unwrap();

        assert_eq!(
            find(&registry, "azure_devops_build_definition_info", &[("buildDefinitionName", "ci")]).len(),
            1
        );
        assert_eq!(
            value(&registry, "azure_devops_build_stage", &[("id", "s1"), ("type", "duration")]),
            Some(50.0)
        );
        assert_eq!(
            value(&registry, "azure_devops_build_stage", &[("id", "s1"), ("type", "warningCount")]),
            Some(2.0)
        );
        assert_eq!(
            value(&registry, "azure_devops_build_task", &[("parentID", "s1"), ("type", "errorCount")]),
            Some(0.0)
        );
        assert!(find(&registry, "azure_devops_build_task", &[("type", "succeeded")]).is_empty());
        assert!(samples(&registry, "azure_devops_build_job").is_empty());
    }

    #[tokio::test]
    async fn test_failure_contributes_nothing() {
        let mut api = mock();
        api.failing.insert("P1".to_string());
        let ctx = context(Arc::new(api));
        let collector = BuildCollector::new();

        assert!(publish_unit(&collector, &ctx, &project()).await.is_err());
    }

    #[tokio::test]
    #[allow(clippy::unwrap_used)]
    async fn test_timeline_failure_skips_only_that_build() {
        let mut api = mock();
        api.failing_resources.insert("timeline/2".to_string());
        api.timelines.insert(
            1,
            Timeline {
                records: vec![TimelineRecord {
                    id: "s1".to_string(),
                    record_type: "Stage".to_string(),
                    start_time: at(30),
                    finish_time: at(80),
                    ..TimelineRecord::default()
                }],
                ..Timeline::default()
            },
        );
        let ctx = context(Arc::new(api));
        let collector = BuildCollector::new();
        let registry = registry_for(&collector);

        publish_unit(&collector, &ctx, &project()).await.unwrap();

        assert_eq!(samples(&registry, "azure_devops_build_info").len(), 3);
        assert_eq!(
            find(&registry, "azure_devops_build_status", &[("type", "succeeded")]).len(),
            2
        );
        let stages = find(&registry, "azure_devops_build_stage", &[("type", "duration")]);
        assert_eq!(stages.len(), 1);
        assert_eq!(stages[0].label("buildID"), "1");
    }
}
