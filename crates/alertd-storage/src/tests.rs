use crate::entities::{alert, decision, event, machine, meta};
use crate::error::{MachineLookupError, StorageError};
use crate::store::{AlertFilter, AlertStore, MachineRow, NewMachine};
use alertd_common::types::{
    CreateAlertRequest, DecisionInput, EventInput, MetaInput, SourceInput,
};
use chrono::{Duration, TimeZone, Utc};
use sea_orm::{ConnectionTrait, EntityTrait, PaginatorTrait};
use std::sync::Arc;
use tempfile::TempDir;

async fn setup() -> (TempDir, AlertStore) {
    alertd_common::id::init(1, 1);
    let dir = TempDir::new().unwrap();
    let url = AlertStore::sqlite_url(dir.path());
    let store = AlertStore::new(&url, dir.path()).await.unwrap();
    (dir, store)
}

async fn add_machine(store: &AlertStore, name: &str) -> MachineRow {
    store
        .register_machine(&NewMachine {
            machine_id: name.to_string(),
            ip_address: Some("10.0.0.1".to_string()),
            version: Some("v1.0.0".to_string()),
            is_validated: true,
        })
        .await
        .unwrap()
}

fn make_request(machine_id: i64, scenario: &str, scope: &str, value: &str) -> CreateAlertRequest {
    let start = Utc.with_ymd_and_hms(2026, 10, 1, 10, 0, 0).unwrap();
    CreateAlertRequest {
        machine_id: Some(machine_id),
        scenario: Some(scenario.to_string()),
        bucket_id: Some("bucket-1".to_string()),
        message: Some(format!("{scenario} triggered by {value}")),
        event_count: Some(2),
        started_at: Some(start),
        stopped_at: Some(start + Duration::minutes(5)),
        capacity: Some(5),
        leak_speed: Some(10),
        reprocess: false,
        source: Some(SourceInput {
            scope: Some(scope.to_string()),
            value: Some(value.to_string()),
            ip: value.to_string(),
            country: "FR".to_string(),
            latitude: 48.85,
            longitude: 2.35,
            ..Default::default()
        }),
        events: Some(vec![
            EventInput {
                time: Some(start),
                serialized: Some(r#"{"line":"failed password"}"#.to_string()),
            },
            EventInput {
                time: Some(start + Duration::seconds(30)),
                serialized: Some(r#"{"line":"failed password again"}"#.to_string()),
            },
        ]),
        metas: None,
        decisions: None,
    }
}

fn make_decision(scenario: &str, ip: i64) -> DecisionInput {
    DecisionInput {
        until: Some(Utc.with_ymd_and_hms(2026, 10, 1, 14, 0, 0).unwrap()),
        scenario: scenario.to_string(),
        decision_type: "ban".to_string(),
        source_ip_start: ip,
        source_ip_end: ip,
        source_value: "1.2.3.4".to_string(),
        source_scope: "ip".to_string(),
    }
}

#[derive(Debug, PartialEq, Eq)]
struct Counts {
    alerts: u64,
    events: u64,
    metas: u64,
    decisions: u64,
}

async fn counts(store: &AlertStore) -> Counts {
    let db = store.db();
    Counts {
        alerts: alert::Entity::find().count(db).await.unwrap(),
        events: event::Entity::find().count(db).await.unwrap(),
        metas: meta::Entity::find().count(db).await.unwrap(),
        decisions: decision::Entity::find().count(db).await.unwrap(),
    }
}

const EMPTY: Counts = Counts {
    alerts: 0,
    events: 0,
    metas: 0,
    decisions: 0,
};

#[tokio::test]
async fn create_alert_persists_alert_and_children() {
    let (_dir, store) = setup().await;
    let machine = add_machine(&store, "sensor-01").await;

    let mut req = make_request(machine.id, "crowdsecurity/ssh-bf", "ip", "1.2.3.4");
    req.metas = Some(vec![
        MetaInput {
            key: "service".to_string(),
            value: "ssh".to_string(),
        },
        MetaInput {
            key: "port".to_string(),
            value: "22".to_string(),
        },
    ]);
    req.decisions = Some(vec![
        make_decision("crowdsecurity/ssh-bf", 16_909_060),
        make_decision("crowdsecurity/ssh-bf", 16_909_061),
        make_decision("manual", 16_909_062),
    ]);

    let created = store.create_alert(req).await.unwrap();
    assert_eq!(created.machine_id, machine.id);
    assert_eq!(created.scenario, "crowdsecurity/ssh-bf");
    assert_eq!(created.source_country, "FR");
    assert_eq!(created.source_as_name, "");

    assert_eq!(
        counts(&store).await,
        Counts {
            alerts: 1,
            events: 2,
            metas: 2,
            decisions: 3,
        }
    );

    let db = store.db();
    let events = event::Entity::find().all(db).await.unwrap();
    let metas = meta::Entity::find().all(db).await.unwrap();
    let decisions = decision::Entity::find().all(db).await.unwrap();
    assert!(events.iter().all(|e| e.alert_id == created.id));
    assert!(metas.iter().all(|m| m.alert_id == created.id));
    assert!(decisions.iter().all(|d| d.alert_id == created.id));
}

#[tokio::test]
async fn unknown_machine_writes_nothing() {
    let (_dir, store) = setup().await;
    add_machine(&store, "sensor-01").await;

    let err = store
        .create_alert(make_request(999, "crowdsecurity/ssh-bf", "ip", "1.2.3.4"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StorageError::OwnerResolutionFailed(MachineLookupError::NotFound { machine_id: 999 })
    ));
    assert_eq!(counts(&store).await, EMPTY);
}

#[tokio::test]
async fn invalid_request_writes_nothing() {
    let (_dir, store) = setup().await;
    let machine = add_machine(&store, "sensor-01").await;

    let mut req = make_request(machine.id, "crowdsecurity/ssh-bf", "ip", "1.2.3.4");
    req.scenario = None;
    req.events = None;

    match store.create_alert(req).await.unwrap_err() {
        StorageError::InvalidRequest(e) => {
            assert_eq!(e.fields, vec!["scenario", "events"]);
        }
        other => panic!("expected InvalidRequest, got {other:?}"),
    }
    assert_eq!(counts(&store).await, EMPTY);
}

#[tokio::test]
async fn child_insert_fault_rolls_back_whole_alert() {
    let (_dir, store) = setup().await;
    let machine = add_machine(&store, "sensor-01").await;

    store
        .db()
        .execute_unprepared(
            "CREATE TRIGGER fail_boom_decision BEFORE INSERT ON decisions
             WHEN NEW.scenario = 'boom'
             BEGIN SELECT RAISE(ABORT, 'injected decision fault'); END;",
        )
        .await
        .unwrap();

    let mut req = make_request(machine.id, "crowdsecurity/ssh-bf", "ip", "1.2.3.4");
    req.metas = Some(vec![MetaInput {
        key: "service".to_string(),
        value: "ssh".to_string(),
    }]);
    req.decisions = Some(vec![
        make_decision("crowdsecurity/ssh-bf", 1),
        make_decision("boom", 2),
    ]);

    let err = store.create_alert(req).await.unwrap_err();
    assert!(matches!(
        err,
        StorageError::Persistence {
            entity: "decision",
            ..
        }
    ));
    assert_eq!(counts(&store).await, EMPTY);

    // 事务回滚后连接仍可正常使用
    let ok = store
        .create_alert(make_request(machine.id, "crowdsecurity/ssh-bf", "ip", "1.2.3.4"))
        .await
        .unwrap();
    let all = store.find_alerts(&AlertFilter::default()).await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].alert.id, ok.id);
}

#[tokio::test]
async fn find_alerts_with_empty_filter_returns_everything_hydrated() {
    let (_dir, store) = setup().await;
    let machine = add_machine(&store, "sensor-01").await;

    let mut first = make_request(machine.id, "crowdsecurity/ssh-bf", "ip", "1.2.3.4");
    first.decisions = Some(vec![make_decision("crowdsecurity/ssh-bf", 16_909_060)]);
    let first = store.create_alert(first).await.unwrap();

    let mut second = make_request(machine.id, "crowdsecurity/http-probing", "range", "5.6.7.0/24");
    second.metas = Some(vec![MetaInput {
        key: "target".to_string(),
        value: "/admin".to_string(),
    }]);
    let second = store.create_alert(second).await.unwrap();

    let all = store.find_alerts(&AlertFilter::default()).await.unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].alert.id, first.id);
    assert_eq!(all[1].alert.id, second.id);

    assert_eq!(all[0].events.len(), 2);
    assert_eq!(all[0].metas.len(), 0);
    assert_eq!(all[0].decisions.len(), 1);
    assert_eq!(all[1].events.len(), 2);
    assert_eq!(all[1].metas.len(), 1);
    assert_eq!(all[1].decisions.len(), 0);
    assert!(all[1].events.iter().all(|e| e.alert_id == second.id));
}

#[tokio::test]
async fn find_alerts_filters_are_substring_and_conjunctive() {
    let (_dir, store) = setup().await;
    let machine = add_machine(&store, "sensor-01").await;

    for (scenario, scope, value) in [
        ("crowdsecurity/ssh-bf", "ip", "1.2.3.4"),
        ("crowdsecurity/ssh-bf", "range", "1.2.3.0/24"),
        ("crowdsecurity/http-probing", "ip", "9.9.9.9"),
    ] {
        store
            .create_alert(make_request(machine.id, scenario, scope, value))
            .await
            .unwrap();
    }

    let ssh = store
        .find_alerts(&AlertFilter {
            scenario: "ssh-bf".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(ssh.len(), 2);
    assert!(ssh.iter().all(|a| a.alert.scenario.contains("ssh-bf")));

    let ssh_ip = store
        .find_alerts(&AlertFilter {
            scenario: "ssh-bf".to_string(),
            source_scope: "ip".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(ssh_ip.len(), 1);
    assert_eq!(ssh_ip[0].alert.source_value, "1.2.3.4");

    let by_value = store
        .find_alerts(&AlertFilter {
            source_value: "1.2.3".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(by_value.len(), 2);

    let none = store
        .find_alerts(&AlertFilter {
            scenario: "http".to_string(),
            source_scope: "range".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(none.is_empty());
}

#[tokio::test]
async fn find_alerts_treats_wildcards_literally() {
    let (_dir, store) = setup().await;
    let machine = add_machine(&store, "sensor-01").await;

    store
        .create_alert(make_request(machine.id, "cpu_100%", "ip", "1.2.3.4"))
        .await
        .unwrap();
    store
        .create_alert(make_request(machine.id, "crowdsecurity/ssh-bf", "ip", "1.2.3.4"))
        .await
        .unwrap();

    let percent = store
        .find_alerts(&AlertFilter {
            scenario: "%".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(percent.len(), 1);
    assert_eq!(percent[0].alert.scenario, "cpu_100%");

    let underscore = store
        .find_alerts(&AlertFilter {
            scenario: "_".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(underscore.len(), 1);
}

#[tokio::test]
async fn created_alert_round_trips_through_find() {
    let (_dir, store) = setup().await;
    let machine = add_machine(&store, "sensor-01").await;

    let mut req = make_request(machine.id, "crowdsecurity/ssh-bf", "ip", "1.2.3.4");
    let decision = make_decision("crowdsecurity/ssh-bf", 16_909_060);
    req.decisions = Some(vec![decision.clone()]);
    let submitted_events = req.events.clone().unwrap();

    let created = store.create_alert(req).await.unwrap();
    let all = store.find_alerts(&AlertFilter::default()).await.unwrap();
    assert_eq!(all.len(), 1);
    let found = &all[0];

    assert_eq!(found.alert.id, created.id);
    assert_eq!(found.alert.source_latitude, 48.85);
    assert_eq!(found.events.len(), submitted_events.len());
    for (got, want) in found.events.iter().zip(&submitted_events) {
        assert_eq!(Some(got.time), want.time);
        assert_eq!(Some(&got.serialized), want.serialized.as_ref());
    }

    assert_eq!(found.decisions.len(), 1);
    let d = &found.decisions[0];
    assert_eq!(Some(d.until), decision.until);
    assert_eq!(d.scenario, decision.scenario);
    assert_eq!(d.decision_type, decision.decision_type);
    assert_eq!(d.source_ip_start, decision.source_ip_start);
    assert_eq!(d.source_ip_end, decision.source_ip_end);
    assert_eq!(d.source_value, decision.source_value);
    assert_eq!(d.source_scope, decision.source_scope);
}

#[tokio::test]
async fn get_and_delete_alert_cascade_children() {
    let (_dir, store) = setup().await;
    let machine = add_machine(&store, "sensor-01").await;

    let mut req = make_request(machine.id, "crowdsecurity/ssh-bf", "ip", "1.2.3.4");
    req.metas = Some(vec![MetaInput {
        key: "service".to_string(),
        value: "ssh".to_string(),
    }]);
    req.decisions = Some(vec![make_decision("crowdsecurity/ssh-bf", 1)]);
    let created = store.create_alert(req).await.unwrap();

    let fetched = store.get_alert(created.id).await.unwrap().unwrap();
    assert_eq!(fetched.events.len(), 2);
    assert_eq!(fetched.metas.len(), 1);
    assert_eq!(fetched.decisions.len(), 1);

    assert!(store.delete_alert(created.id).await.unwrap());
    assert_eq!(counts(&store).await, EMPTY);
    assert!(store.get_alert(created.id).await.unwrap().is_none());
    assert!(!store.delete_alert(created.id).await.unwrap());

    // machine 不受影响
    assert_eq!(machine::Entity::find().count(store.db()).await.unwrap(), 1);
}

#[tokio::test]
async fn register_machine_rejects_duplicates_and_resolves() {
    let (_dir, store) = setup().await;
    let machine = add_machine(&store, "sensor-01").await;

    let err = store
        .register_machine(&NewMachine {
            machine_id: "sensor-01".to_string(),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::Conflict { entity: "machine", .. }));

    let resolved = store.resolve_machine(machine.id).await.unwrap();
    assert_eq!(resolved.machine_id, "sensor-01");
    assert!(resolved.is_validated);

    let by_name = store.get_machine_by_name("sensor-01").await.unwrap();
    assert_eq!(by_name.map(|m| m.id), Some(machine.id));
    assert!(store.get_machine_by_name("nope").await.unwrap().is_none());

    assert!(matches!(
        store.resolve_machine(machine.id + 1).await,
        Err(MachineLookupError::NotFound { .. })
    ));
}

#[tokio::test]
async fn concurrent_submissions_are_isolated() {
    let (_dir, store) = setup().await;
    let machine = add_machine(&store, "sensor-01").await;
    let store = Arc::new(store);

    let mut handles = Vec::new();
    for i in 0..8 {
        let store = store.clone();
        let machine_id = machine.id;
        handles.push(tokio::spawn(async move {
            let mut req =
                make_request(machine_id, "crowdsecurity/ssh-bf", "ip", &format!("10.0.0.{i}"));
            req.decisions = Some(vec![make_decision("crowdsecurity/ssh-bf", i)]);
            store.create_alert(req).await
        }));
    }
    for h in handles {
        h.await.unwrap().unwrap();
    }

    let all = store.find_alerts(&AlertFilter::default()).await.unwrap();
    assert_eq!(all.len(), 8);
    for a in &all {
        assert_eq!(a.events.len(), 2);
        assert_eq!(a.decisions.len(), 1);
        assert!(a.decisions.iter().all(|d| d.alert_id == a.alert.id));
    }
}

#[tokio::test]
async fn register_machine_concurrent_duplicates_conflict() {
    let (_dir, store) = setup().await;
    let store = Arc::new(store);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store
                .register_machine(&NewMachine {
                    machine_id: "sensor-race".to_string(),
                    ..Default::default()
                })
                .await
        }));
    }

    let mut created = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => created += 1,
            Err(StorageError::Conflict { entity: "machine", .. }) => {}
            Err(other) => panic!("expected Conflict, got {other:?}"),
        }
    }
    assert_eq!(created, 1);
    assert_eq!(machine::Entity::find().count(store.db()).await.unwrap(), 1);
}

#[tokio::test]
async fn find_alerts_filters_are_case_sensitive() {
    let (_dir, store) = setup().await;
    let machine = add_machine(&store, "sensor-01").await;
    store
        .create_alert(make_request(machine.id, "crowdsecurity/ssh-bf", "Ip", "1.2.3.4"))
        .await
        .unwrap();

    let upper = store
        .find_alerts(&AlertFilter {
            scenario: "SSH-BF".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(upper.is_empty());

    let scope = store
        .find_alerts(&AlertFilter {
            source_scope: "Ip".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(scope.len(), 1);

    let lower_scope = store
        .find_alerts(&AlertFilter {
            source_scope: "ip".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(lower_scope.is_empty());
}

#[tokio::test]
async fn find_alerts_returns_more_rows_than_sqlite_bind_limit() {
    let (_dir, store) = setup().await;
    let machine = add_machine(&store, "sensor-01").await;
    let seed = store
        .create_alert(make_request(machine.id, "crowdsecurity/ssh-bf", "ip", "1.2.3.4"))
        .await
        .unwrap();

    // 复制 40000 份 alert，每份带一条 event，超过 SQLite 的 32766 绑定参数上限
    let db = store.db();
    db.execute_unprepared(&format!(
        "WITH RECURSIVE seq(n) AS (SELECT 1 UNION ALL SELECT n + 1 FROM seq WHERE n < 40000)
         INSERT INTO alerts (id, scenario, bucket_id, message, events_count, started_at,
             stopped_at, source_scope, source_value, source_ip, source_range,
             source_as_number, source_as_name, source_country, source_latitude,
             source_longitude, capacity, leak_speed, reprocess, machine_id, created_at,
             updated_at)
         SELECT a.id + seq.n, a.scenario, a.bucket_id, a.message, a.events_count,
             a.started_at, a.stopped_at, a.source_scope, a.source_value, a.source_ip,
             a.source_range, a.source_as_number, a.source_as_name, a.source_country,
             a.source_latitude, a.source_longitude, a.capacity, a.leak_speed, a.reprocess,
             a.machine_id, a.created_at, a.updated_at
         FROM alerts a, seq WHERE a.id = {id}",
        id = seed.id
    ))
    .await
    .unwrap();
    db.execute_unprepared(&format!(
        "INSERT INTO events (id, alert_id, time, serialized, created_at)
         SELECT -a.id, a.id, e.time, e.serialized, e.created_at
         FROM alerts a, (SELECT * FROM events WHERE alert_id = {id} LIMIT 1) e
         WHERE a.id <> {id}",
        id = seed.id
    ))
    .await
    .unwrap();

    let all = store.find_alerts(&AlertFilter::default()).await.unwrap();
    assert_eq!(all.len(), 40_001);
    assert_eq!(all[0].alert.id, seed.id);
    assert_eq!(all[0].events.len(), 2);
    assert!(all.windows(2).all(|w| w[0].alert.id < w[1].alert.id));
    for view in &all[1..] {
        assert_eq!(view.events.len(), 1);
        assert_eq!(view.events[0].alert_id, view.alert.id);
    }

    let filtered = store
        .find_alerts(&AlertFilter {
            scenario: "ssh-bf".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(filtered.len(), 40_001);
}

#[tokio::test]
async fn cancelled_create_alert_commits_nothing() {
    let (_dir, store) = setup().await;
    let machine = add_machine(&store, "sensor-01").await;

    let now = Utc::now();
    let mut req = make_request(machine.id, "crowdsecurity/ssh-bf", "ip", "1.2.3.4");
    req.events = Some(
        (0..5_000)
            .map(|i| EventInput {
                time: Some(now),
                serialized: Some(format!(r#"{{"line":{i}}}"#)),
            })
            .collect(),
    );

    // 写入尚未完成时丢弃 future，未提交的事务随之回滚
    let outcome =
        tokio::time::timeout(std::time::Duration::from_millis(1), store.create_alert(req)).await;
    assert!(outcome.is_err(), "write finished before the deadline");
    assert_eq!(counts(&store).await, EMPTY);

    // 连接池仍可正常写入
    store
        .create_alert(make_request(machine.id, "crowdsecurity/ssh-bf", "ip", "1.2.3.4"))
        .await
        .unwrap();
    assert_eq!(
        counts(&store).await,
        Counts {
            alerts: 1,
            events: 2,
            metas: 0,
            decisions: 0,
        }
    );
}
