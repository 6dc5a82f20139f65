//! Integration tests for the HTTP transport against a mock rowset server.

use std::sync::Arc;

use horizon_grid::{
    Notification, ReloadDecision, ReloadOptions, RowsetConfig, RowsetModel, SaveEffect, TransportFailure, Value,
};
use horizon_grid_net::{HttpClient, HttpTransport, RowsetDriver};
use parking_lot::Mutex;
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn snapshot() -> serde_json::Value {
    json!({
        "fields": [{"name": "id"}, {"name": "name"}],
        "rows": [[1, "ann"], [2, "bob"]],
        "pk": "id"
    })
}

async fn driver(server: &MockServer) -> RowsetDriver {
    let client = HttpClient::builder()
        .user_agent("grid-tests")
        .build()
        .expect("Failed to build client");
    let model = RowsetModel::new(RowsetConfig::with_url(format!("{}/rowsets/people", server.uri())));
    RowsetDriver::with_model(model, Arc::new(HttpTransport::new(client)))
}

async fn mount_snapshot(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/rowsets/people"))
        .respond_with(ResponseTemplate::new(200).set_body_json(snapshot()))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_load_snapshot() {
    let server = MockServer::start().await;
    mount_snapshot(&server).await;
    let driver = driver(&server).await;

    let decision = driver.reload(ReloadOptions::default()).await;
    assert!(matches!(decision, ReloadDecision::Fetch(_)));
    assert!(!driver.is_loading());

    let model = driver.model().lock();
    assert!(model.is_ready());
    assert_eq!(model.row_count(), 2);
    let row = model.lookup("id", &[2.into()]).unwrap()[0];
    assert_eq!(model.cell_val(row, "name"), Some(&Value::from("bob")));
}

#[tokio::test]
async fn test_load_sends_filter_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rowsets/lines"))
        .and(query_param("filter", "[7]"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "fields": [{"name": "line"}, {"name": "order_id"}],
            "rows": [[1, 7]],
            "pk": "line"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let model = RowsetModel::new(RowsetConfig {
        params: Some("order_id".into()),
        ..RowsetConfig::with_url(format!("{}/rowsets/lines", server.uri()))
    });
    let driver = RowsetDriver::with_model(model, Arc::new(HttpTransport::new(HttpClient::new().unwrap())));
    let decision = driver
        .model()
        .lock()
        .set_param_vals(horizon_grid::ParamVals::Rows(vec![vec![("order_id".into(), 7.into())]]));
    let Some(ReloadDecision::Fetch(ticket)) = decision else {
        panic!("expected a fetch");
    };
    assert_eq!(ticket.filter.as_deref(), Some("[7]"));

    // The engine issued the ticket; the driver performs the next one.
    driver.reload(ReloadOptions::default()).await;
    assert_eq!(driver.model().lock().row_count(), 1);
}

#[tokio::test]
async fn test_save_posts_changeset() {
    let server = MockServer::start().await;
    mount_snapshot(&server).await;
    Mock::given(method("POST"))
        .and(path("/rowsets/people"))
        .and(body_partial_json(json!({
            "exec": "save",
            "changes": {"rows": [{"type": "update", "values": {"name": "anna", "id:old": 1}}]}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"rows": [{"values": [1, "Anna"]}]})))
        .expect(1)
        .mount(&server)
        .await;

    let driver = driver(&server).await;
    driver.reload(ReloadOptions::default()).await;
    let row = {
        let mut model = driver.model().lock();
        let row = model.lookup("id", &[1.into()]).unwrap()[0];
        model.set_cell_val(row, "name", "anna", true).unwrap();
        row
    };

    let effect = driver.save().await;
    assert!(matches!(effect, SaveEffect::Submit(_)));
    let model = driver.model().lock();
    assert!(!model.has_changes());
    assert!(!model.is_saving());
    // The server's canonical value wins.
    assert_eq!(model.cell_val(row, "name"), Some(&Value::from("Anna")));
    assert_eq!(model.cell_input_val(row, "name"), Some(&Value::from("Anna")));
}

#[tokio::test]
async fn test_save_http_error_keeps_edits() {
    let server = MockServer::start().await;
    mount_snapshot(&server).await;
    Mock::given(method("POST"))
        .and(path("/rowsets/people"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let driver = driver(&server).await;
    driver.reload(ReloadOptions::default()).await;

    let notes = Arc::new(Mutex::new(Vec::new()));
    let failures = Arc::new(Mutex::new(Vec::new()));
    let row = {
        let mut model = driver.model().lock();
        let n = notes.clone();
        model
            .signals()
            .notify
            .connect(move |note: &Notification| n.lock().push(note.message.clone()));
        let f = failures.clone();
        model
            .signals()
            .save_failed
            .connect(move |failed| f.lock().push(failed.failure.clone()));
        let row = model.lookup("id", &[1.into()]).unwrap()[0];
        model.set_cell_val(row, "name", "anna", true).unwrap();
        row
    };

    driver.save().await;
    assert_eq!(*notes.lock(), ["Server returned 500 Internal Server Error"]);
    assert_eq!(
        *failures.lock(),
        [TransportFailure::Http {
            status: 500,
            message: "Internal Server Error".into()
        }]
    );
    let model = driver.model().lock();
    assert!(model.has_changes());
    assert_eq!(model.cell_input_val(row, "name"), Some(&Value::from("anna")));
    assert_eq!(model.cell_val(row, "name"), Some(&Value::from("ann")));
}

#[tokio::test]
async fn test_load_failure_keeps_rows() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rowsets/people"))
        .respond_with(ResponseTemplate::new(200).set_body_json(snapshot()))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rowsets/people"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let driver = driver(&server).await;
    driver.reload(ReloadOptions::default()).await;

    let failures = Arc::new(Mutex::new(Vec::new()));
    let f = failures.clone();
    driver
        .model()
        .lock()
        .signals()
        .load_failed
        .connect(move |failure: &TransportFailure| f.lock().push(failure.clone()));

    driver.reload(ReloadOptions::default()).await;
    assert_eq!(failures.lock().len(), 1);
    assert!(matches!(failures.lock()[0], TransportFailure::Http { status: 404, .. }));
    assert_eq!(driver.model().lock().row_count(), 2);
}

#[tokio::test]
async fn test_malformed_snapshot_is_a_network_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rowsets/people"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let driver = driver(&server).await;
    let failures = Arc::new(Mutex::new(Vec::new()));
    let f = failures.clone();
    driver
        .model()
        .lock()
        .signals()
        .load_failed
        .connect(move |failure: &TransportFailure| f.lock().push(failure.clone()));

    driver.reload(ReloadOptions::default()).await;
    assert_eq!(*failures.lock(), [TransportFailure::Network]);
    assert!(!driver.model().lock().is_ready());
}
