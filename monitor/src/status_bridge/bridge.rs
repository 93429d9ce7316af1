use crate::status_bridge::model::{SharedModel, StatusModel};
use log::{error, info};
use std::{net::SocketAddr, sync::Arc, thread};
use tokio::runtime::Builder;
use tscore::interface::StatusRecord;
use tscore::telemetry::MetricsRecorder;
use warp::{http::StatusCode, reply::Response, Filter, Reply};

pub fn default_bind_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9000))
}

fn latest(model: &SharedModel) -> Option<StatusRecord> {
    model.read().ok().and_then(|m| m.latest.clone())
}

fn no_record_yet() -> Response {
    warp::reply::with_status("no dwell completed yet\n", StatusCode::NOT_FOUND).into_response()
}

/// `GET /status` (XML), `GET /status.json` and `GET /metrics`.
pub fn routes(
    model: SharedModel,
    metrics: Arc<MetricsRecorder>,
) -> impl Filter<Extract = (Response,), Error = warp::Rejection> + Clone {
    let model_filter = warp::any().map(move || model.clone());
    let metrics_filter = warp::any().map(move || metrics.clone());

    let xml_route = warp::path("status")
        .and(warp::path::end())
        .and(warp::get())
        .and(model_filter.clone())
        .map(|model: SharedModel| match latest(&model) {
            Some(record) => {
                warp::reply::with_header(record.to_xml(), "content-type", "application/xml")
                    .into_response()
            }
            None => no_record_yet(),
        });

    let json_route = warp::path("status.json")
        .and(warp::path::end())
        .and(warp::get())
        .and(model_filter)
        .map(|model: SharedModel| match latest(&model) {
            Some(record) => match record.to_json() {
                Ok(body) => {
                    warp::reply::with_header(body, "content-type", "application/json")
                        .into_response()
                }
                Err(err) => {
                    error!("status bridge: {}", err);
                    StatusCode::INTERNAL_SERVER_ERROR.into_response()
                }
            },
            None => no_record_yet(),
        });

    let metrics_route = warp::path("metrics")
        .and(warp::path::end())
        .and(warp::get())
        .and(metrics_filter)
        .map(|metrics: Arc<MetricsRecorder>| warp::reply::json(&metrics.snapshot()).into_response());

    xml_route.or(json_route).unify().or(metrics_route).unify()
}

/// HTTP endpoint exposing the latest status record and run counters.
pub struct StatusBridge {
    model: SharedModel,
}

impl StatusBridge {
    pub fn spawn(addr: SocketAddr, metrics: Arc<MetricsRecorder>) -> Self {
        let model = StatusModel::shared();
        let api = routes(model.clone(), metrics);

        thread::spawn(move || {
            let runtime = match Builder::new_current_thread().enable_all().build() {
                Ok(runtime) => runtime,
                Err(err) => {
                    error!("status bridge runtime: {}", err);
                    return;
                }
            };
            runtime.block_on(async move {
                warp::serve(api).run(addr).await;
            });
        });
        info!("status bridge listening on http://{}", addr);

        Self { model }
    }

    pub fn model(&self) -> SharedModel {
        self.model.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tscore::interface::{ChannelStatus, DistanceUnits};

    fn record() -> StatusRecord {
        StatusRecord {
            time_secs: 1_700_000_000,
            msecs: 5,
            dwell_secs: 0.064,
            prf: 1000.0,
            n_samples: 64,
            start_gate: 0,
            n_gates: 100,
            el: 0.5,
            az: 10.0,
            units: DistanceUnits::Meters,
            channels: vec![ChannelStatus {
                mean_max_dbm: -6.0,
                peak_max_dbm: -5.5,
                range_to_max: 6150.0,
                vel: Some(1.25),
            }],
        }
    }

    #[tokio::test]
    async fn status_routes_serve_latest_record() {
        let model = StatusModel::shared();
        let metrics = Arc::new(MetricsRecorder::new());
        let api = routes(model.clone(), metrics.clone());

        let resp = warp::test::request().path("/status").reply(&api).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        model.write().unwrap().publish(&record());
        let resp = warp::test::request().path("/status").reply(&api).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = std::str::from_utf8(resp.body()).unwrap();
        assert!(body.starts_with("<TsPrintMaxPower>"));
        assert!(body.contains("<rangeToMax0>6150</rangeToMax0>"));

        let resp = warp::test::request().path("/status.json").reply(&api).await;
        let value: serde_json::Value = serde_json::from_slice(resp.body()).unwrap();
        assert_eq!(value["n_gates"], 100);
    }

    #[tokio::test]
    async fn metrics_route_reports_counters() {
        let metrics = Arc::new(MetricsRecorder::new());
        metrics.record_pulse();
        metrics.record_gap(2);
        let api = routes(StatusModel::shared(), metrics);
        let resp = warp::test::request().path("/metrics").reply(&api).await;
        let value: serde_json::Value = serde_json::from_slice(resp.body()).unwrap();
        assert_eq!(value["pulses_read"], 1);
        assert_eq!(value["missing_pulses"], 2);
    }
}
