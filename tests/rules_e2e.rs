use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use autorules::{
    ActionError, ActiveRecording, ArchivedRecording, AutoRulesConfig, AutoRulesError, CompileError,
    DatasetUploader, InMemoryTargetSource, JobActions, JobDispatcher, JobState, MatchError,
    MatchEvaluator, NotificationCategory, NotificationPublisher, RecordingArchiver, RecordingLookup,
    ReportGenerator, ReportResult, Rule, RuleEvent, RuleEventCategory, RuleReactor, Target,
    TargetSnapshot, UploadSource,
};

/// Records which recordings were archived.
#[derive(Default)]
struct Archive {
    archived: Mutex<Vec<String>>,
}

impl RecordingArchiver for Archive {
    fn archive(&self, recording: &ActiveRecording) -> Result<ArchivedRecording, ActionError> {
        let filename = format!("{}_{}.jfr", recording.name(), recording.target_id());
        self.archived.lock().unwrap().push(filename.clone());
        ArchivedRecording::new("jvm", filename).map_err(|e| ActionError::new(e.to_string()))
    }
}

struct Unused;

impl DatasetUploader for Unused {
    fn upload(&self, _source: &UploadSource) -> Result<String, ActionError> {
        Err(ActionError::new("unused"))
    }
}

impl ReportGenerator for Unused {
    fn active_report(&self, _recording: &ActiveRecording) -> Result<ReportResult, ActionError> {
        Err(ActionError::new("unused"))
    }

    fn archived_report(&self, _recording: &ArchivedRecording) -> Result<ReportResult, ActionError> {
        Err(ActionError::new("unused"))
    }
}

/// Maps target alias to storage id; only known aliases have a recording.
struct Recordings {
    ids: HashMap<String, i64>,
}

impl RecordingLookup for Recordings {
    fn active_recording(&self, rule: &Rule, target: &TargetSnapshot) -> Option<ActiveRecording> {
        let id = *self.ids.get(target.alias())?;
        ActiveRecording::new(id, 1, format!("auto_{}", rule.name)).ok()
    }
}

fn targets() -> Vec<Target> {
    let mut web = Target::new(1, "service:jmx:rmi:///jndi/rmi://web:9091/jmxrmi", "web");
    web.annotations.insert("PORT".to_string(), "9091".to_string());
    web.labels.insert("app".to_string(), "shop".to_string());
    let mut api = Target::new(2, "service:jmx:rmi:///jndi/rmi://api:9091/jmxrmi", "api");
    api.labels.insert("app".to_string(), "shop".to_string());
    let mut db = Target::new(3, "service:jmx:rmi:///jndi/rmi://db:9091/jmxrmi", "db");
    db.labels.insert("app".to_string(), "inventory".to_string());
    vec![web, api, db]
}

#[test]
fn rule_lifecycle_drives_archival_and_notifications() {
    let cfg: AutoRulesConfig = serde_json::from_str(r#"{"jobs": {"workers": 2}}"#).unwrap();
    cfg.validate().unwrap();

    let publisher = Arc::new(NotificationPublisher::new(cfg.notifications.clone()));
    let events = publisher.subscribe();
    let archive = Arc::new(Archive::default());
    let actions = JobActions::new(archive.clone(), Arc::new(Unused), Arc::new(Unused));
    let dispatcher =
        Arc::new(JobDispatcher::new(cfg.jobs.clone(), actions, publisher.clone()).unwrap());

    let all = targets();
    let ids = all
        .iter()
        .map(|t| (t.alias.clone(), t.id))
        .filter(|(alias, _)| alias != "api")
        .collect();
    let reactor = RuleReactor::new(
        Arc::new(MatchEvaluator::new()),
        dispatcher,
        publisher.clone(),
        Arc::new(InMemoryTargetSource::new(all)),
        Arc::new(Recordings { ids }),
    );

    let rule = Rule::new("shop", "target.labels.app == 'shop'", "template=Continuous,type=TARGET")
        .with_description("archive the shop services")
        .with_archival(60, 5)
        .with_limits(3600, 0);

    // `api` matches but has no recording; `db` has a recording but does not match.
    let handles = reactor
        .on_rule_event(&RuleEvent::new(RuleEventCategory::Created, rule.clone()))
        .unwrap();
    assert_eq!(handles.len(), 1);
    for h in handles {
        assert_eq!(h.join_timeout(Duration::from_secs(5)).unwrap(), JobState::Succeeded);
    }
    assert_eq!(*archive.archived.lock().unwrap(), vec!["auto_shop_1.jfr".to_string()]);

    let created = events.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(created.category, NotificationCategory::RuleCreated);
    assert_eq!(created.payload["eventSpecifier"], "template=Continuous,type=TARGET");
    let archived = events.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(archived.category, NotificationCategory::ArchiveRecordingSuccess);

    let handles = reactor
        .on_rule_event(&RuleEvent::new(RuleEventCategory::Deleted, rule))
        .unwrap();
    assert!(handles.is_empty());
    let deleted = events.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(deleted.category, NotificationCategory::RuleDeleted);
    assert_eq!(deleted.payload["name"], "shop");
    assert!(!reactor.evaluator().cache().has_program("target.labels.app == 'shop'"));
}

#[test]
fn invalid_rule_is_rejected_before_anything_happens() {
    let publisher = Arc::new(NotificationPublisher::default());
    let events = publisher.subscribe();
    let actions = JobActions::new(Arc::new(Archive::default()), Arc::new(Unused), Arc::new(Unused));
    let dispatcher =
        Arc::new(JobDispatcher::new(Default::default(), actions, publisher.clone()).unwrap());
    let reactor = RuleReactor::new(
        Arc::new(MatchEvaluator::new()),
        dispatcher,
        publisher,
        Arc::new(InMemoryTargetSource::new(targets())),
        Arc::new(Recordings { ids: HashMap::new() }),
    );

    let rule = Rule::new("", "true", "template=Continuous");
    let err = reactor
        .on_rule_event(&RuleEvent::new(RuleEventCategory::Created, rule))
        .unwrap_err();
    assert!(err.is_validation());
    assert!(events.try_recv().is_none());

    for category in [RuleEventCategory::Created, RuleEventCategory::Updated] {
        let malformed =
            Rule::new("broken", "target.alias ==", "template=Continuous").with_archival(30, 1);
        let err = reactor
            .on_rule_event(&RuleEvent::new(category, malformed))
            .unwrap_err();
        let AutoRulesError::Match(MatchError::Compile(CompileError::Syntax { .. })) = err else {
            panic!("expected a syntax error, got {err:?}");
        };
        assert!(events.try_recv().is_none());
    }
}
