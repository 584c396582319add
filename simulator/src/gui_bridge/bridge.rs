use crate::gui_bridge::model::StackBoard;
use migcore::interface::ControlSignal;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use warp::http::StatusCode;
use warp::reply::{Json, WithStatus};
use warp::Filter;

pub fn default_bind_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9000))
}

/// HTTP endpoint exposing the stack board and the control topic.
pub struct HttpBridge {
    board: Arc<StackBoard>,
    control: broadcast::Sender<ControlSignal>,
}

fn send_signal(
    control: &broadcast::Sender<ControlSignal>,
    signal: ControlSignal,
) -> WithStatus<Json> {
    let wire = signal.as_wire().to_string();
    match control.send(signal) {
        Ok(receivers) => {
            log::info!("[bridge] broadcast {wire} to {receivers} subscribers");
            warp::reply::with_status(
                warp::reply::json(&json!({"status": "ok", "signal": wire, "receivers": receivers})),
                StatusCode::ACCEPTED,
            )
        }
        Err(_) => {
            log::warn!("[bridge] {wire} dropped, no subscribers");
            warp::reply::with_status(
                warp::reply::json(&json!({"status": "unavailable", "signal": wire})),
                StatusCode::SERVICE_UNAVAILABLE,
            )
        }
    }
}

impl HttpBridge {
    pub fn new(board: Arc<StackBoard>, control: broadcast::Sender<ControlSignal>) -> Self {
        Self { board, control }
    }

    pub fn routes(
        &self,
    ) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
        let board = self.board.clone();
        let board_filter = warp::any().map(move || board.clone());
        let control = self.control.clone();
        let control_filter = warp::any().map(move || control.clone());

        let stacks_route = warp::path("stacks")
            .and(warp::path::end())
            .and(warp::get())
            .and(board_filter)
            .map(|board: Arc<StackBoard>| warp::reply::json(&board.snapshot()));

        let reload_route = warp::path("reload")
            .and(warp::path::end())
            .and(warp::post())
            .and(control_filter.clone())
            .map(|control: broadcast::Sender<ControlSignal>| {
                send_signal(&control, ControlSignal::ReloadTravelTimes)
            });

        let stop_route = warp::path("stop")
            .and(warp::path::end())
            .and(warp::post())
            .and(control_filter)
            .map(|control: broadcast::Sender<ControlSignal>| {
                send_signal(&control, ControlSignal::Shutdown)
            });

        stacks_route
            .or(reload_route)
            .or(stop_route)
            .with(warp::log("simulator::bridge"))
    }

    /// Serves on the current tokio runtime until the task is dropped.
    pub fn spawn(&self, addr: SocketAddr) -> JoinHandle<()> {
        let routes = self.routes();
        log::info!("[bridge] listening on http://{addr}");
        tokio::spawn(warp::serve(routes).run(addr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use migcore::interface::{Message, RoutingKey};
    use migcore::WaveformPacket;

    fn bridge() -> (HttpBridge, Arc<StackBoard>, broadcast::Receiver<ControlSignal>) {
        let board = Arc::new(StackBoard::new());
        let (control, rx) = broadcast::channel(4);
        (HttpBridge::new(board.clone(), control), board, rx)
    }

    #[tokio::test]
    async fn stacks_route_returns_board_snapshot() {
        let (bridge, board, _rx) = bridge();
        let packet = WaveformPacket::new("2", 0.0, 0.1, vec![1.0, 3.0]);
        board.apply(&RoutingKey::Point(2), &Message::Data(packet));

        let response = warp::test::request()
            .method("GET")
            .path("/stacks")
            .reply(&bridge.routes())
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["best_point"], 2);
        assert_eq!(body["max_stack"], 3.0);
    }

    #[tokio::test]
    async fn control_routes_broadcast_signals() {
        let (bridge, _board, mut rx) = bridge();
        let routes = bridge.routes();

        let response = warp::test::request()
            .method("POST")
            .path("/reload")
            .reply(&routes)
            .await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(rx.recv().await.unwrap(), ControlSignal::ReloadTravelTimes);

        let response = warp::test::request()
            .method("POST")
            .path("/stop")
            .reply(&routes)
            .await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(rx.recv().await.unwrap(), ControlSignal::Shutdown);
    }

    #[tokio::test]
    async fn signal_without_subscribers_is_unavailable() {
        let (bridge, _board, rx) = bridge();
        drop(rx);
        let response = warp::test::request()
            .method("POST")
            .path("/reload")
            .reply(&bridge.routes())
            .await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
