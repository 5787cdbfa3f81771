use std::{convert::Infallible, str::FromStr, sync::Arc};
use async_stream::stream;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use swarm_observer_lib::{CoordinatorError, CoordinatorService};
use warp::{Filter, Rejection, Reply, http::StatusCode, sse::{Event, reply, keep_alive}};
use log::{info, warn};

/// The control input: a button press, or one of its parts on its own.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Command {
    Press,
    Start,
    Stop,
    Reset,
}

impl FromStr for Command {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "press" => Ok(Self::Press),
            "start" => Ok(Self::Start),
            "stop" => Ok(Self::Stop),
            "reset" => Ok(Self::Reset),
            other => Err(format!("unknown command '{}'", other)),
        }
    }
}

#[derive(Debug, Serialize)]
struct CommandReply {
    ok: bool,
    running: bool,
    error: Option<String>,
}

pub async fn run_command(coord: &CoordinatorService, cmd: Command) -> Result<(), CoordinatorError> {
    match cmd {
        Command::Press => coord.press().await.map(|_| ()),
        Command::Start => coord.start().await.map(|_| ()),
        Command::Stop => coord.stop().await,
        Command::Reset => coord.reset().await,
    }
}

fn status_code(err: &CoordinatorError) -> StatusCode {
    match err {
        CoordinatorError::Debounced(_) => StatusCode::TOO_MANY_REQUESTS,
        CoordinatorError::AlreadyRunning | CoordinatorError::NotRunning => StatusCode::CONFLICT,
        CoordinatorError::Bind { .. } => StatusCode::SERVICE_UNAVAILABLE,
        CoordinatorError::SessionLog(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Cloneable filter handing out the coordinator
pub fn with_coordinator(
    coord: Arc<CoordinatorService>,
) -> impl Filter<Extract = (Arc<CoordinatorService>,), Error = Infallible> + Clone {
    warp::any().map(move || coord.clone())
}

async fn handle_command(cmd: Command, coord: Arc<CoordinatorService>) -> Result<impl Reply, Rejection> {
    info!("POST /control/{:?}", cmd);
    let result = run_command(&coord, cmd).await;
    let running = coord.is_running().await;

    let (code, error) = match result {
        Ok(()) => (StatusCode::OK, None),
        Err(e) => {
            warn!("control {:?} failed: {}", cmd, e);
            (status_code(&e), Some(e.to_string()))
        }
    };
    let body = CommandReply { ok: error.is_none(), running, error };
    Ok(warp::reply::with_status(warp::reply::json(&body), code))
}

/// POST /control/<command>, GET /status and GET /events (SSE)
pub fn routes(
    coord: Arc<CoordinatorService>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    let control = warp::post()
        .and(warp::path!("control" / Command))
        .and(with_coordinator(coord.clone()))
        .and_then(handle_command);

    let status = warp::get()
        .and(warp::path!("status"))
        .and(with_coordinator(coord.clone()))
        .and_then(|coord: Arc<CoordinatorService>| async move {
            Ok::<_, Rejection>(warp::reply::json(&coord.status().await))
        });

    let ctx = coord.context().clone();
    let events = warp::get()
        .and(warp::path!("events"))
        .map(move || {
            // subscribe inside the closure: one receiver per client
            let mut rx = ctx.subscribe();
            let event_stream = stream! {
                loop {
                    match rx.recv().await {
                        Ok(msg) => match serde_json::to_string(&msg) {
                            Ok(json) => {
                                yield Ok::<_, Infallible>(Event::default().data(json));
                            }
                            Err(e) => warn!("cannot encode event: {}", e),
                        },
                        Err(RecvError::Lagged(skipped)) => {
                            warn!("SSE client lagged, dropped {} events", skipped);
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
            };
            reply(keep_alive().stream(event_stream))
        });

    control.or(status).or(events)
}
