//! HTTP job-queue wrapper around the converter.
//!
//! Conversions are queued, processed by a single background worker, and
//! fetched by key. Each conversion runs on its own thread under a 15 second
//! wall clock; overruns get their cancellation flag set and are reported as
//! timeouts. Finished tasks are kept for a day so clients can poll late.

use actix_cors::Cors;
use actix_web::{App, HttpResponse, HttpServer, Responder, web};
use ahash::AHashMap;
use chrono::{DateTime, Utc};
use clap::Parser;
use log::{info, warn};
use railchess::aarc::parse_geomap;
use railchess::converter::convert_to_rc_cancellable;
use serde_json::{Value, json};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::Duration;

const CONVERSION_WALL_CLOCK: Duration = Duration::from_secs(15);
const CANCEL_GRACE: Duration = Duration::from_millis(500);

#[derive(Parser, Debug)]
#[command(author, version, about = "AARC to RC conversion job server", long_about = None)]
struct Args {
    #[arg(short, long, default_value = "127.0.0.1")]
    address: String,
    #[arg(short, long, default_value_t = 8080)]
    port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Timeout,
}

impl TaskStatus {
    fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Timeout => "timeout",
        }
    }

    fn is_finished(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Timeout
        )
    }
}

#[derive(Debug)]
struct Task {
    status: TaskStatus,
    result: Option<Value>,
    error: Option<String>,
    completed_at: Option<DateTime<Utc>>,
}

struct Job {
    key: String,
    aarc: Value,
    config: Value,
    cancel: Arc<AtomicBool>,
}

struct ServerState {
    tasks: Mutex<AHashMap<String, Task>>,
    queue: Mutex<mpsc::Sender<Job>>,
}

fn finish_task(state: &ServerState, key: &str, status: TaskStatus, result: Option<Value>, error: Option<String>) {
    let mut tasks = state.tasks.lock().unwrap();
    if let Some(task) = tasks.get_mut(key) {
        task.status = status;
        task.result = result;
        task.error = error;
        task.completed_at = Some(Utc::now());
    }
}

/// Run one conversion under the wall clock. The conversion itself happens on
/// a scratch thread; on timeout the cancellation flag is raised and the
/// thread gets a short grace period to notice it.
fn process_job(state: &ServerState, job: Job) {
    {
        let mut tasks = state.tasks.lock().unwrap();
        if let Some(task) = tasks.get_mut(&job.key) {
            task.status = TaskStatus::Processing;
        }
    }

    let (tx, rx) = mpsc::channel::<Result<Value, String>>();
    let cancel = job.cancel.clone();
    thread::spawn(move || {
        let outcome = parse_geomap(&job.aarc, &job.config)
            .and_then(|geomap| convert_to_rc_cancellable(&geomap, Some(&cancel)))
            .map(|rcmap| rcmap.to_json())
            .map_err(|e| e.to_string());
        // the receiver is gone when the worker already timed this job out
        let _ = tx.send(outcome);
    });

    let outcome = match rx.recv_timeout(CONVERSION_WALL_CLOCK) {
        Ok(outcome) => outcome,
        Err(mpsc::RecvTimeoutError::Timeout) => {
            job.cancel.store(true, Ordering::Relaxed);
            match rx.recv_timeout(CANCEL_GRACE) {
                Ok(_) | Err(_) => {
                    warn!("task {} exceeded the {CONVERSION_WALL_CLOCK:?} wall clock", job.key);
                    finish_task(
                        state,
                        &job.key,
                        TaskStatus::Timeout,
                        None,
                        Some("Conversion took longer than 15 seconds".to_string()),
                    );
                    return;
                }
            }
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => Err("conversion thread died".to_string()),
    };

    match outcome {
        Ok(result) => finish_task(state, &job.key, TaskStatus::Completed, Some(result), None),
        Err(message) => finish_task(state, &job.key, TaskStatus::Failed, None, Some(message)),
    }
}

fn worker_loop(state: Arc<ServerState>, jobs: mpsc::Receiver<Job>) {
    for job in jobs {
        process_job(&state, job);
    }
}

/// Drop finished tasks a day after completion, once an hour.
fn cleanup_loop(state: Arc<ServerState>) {
    loop {
        thread::sleep(Duration::from_secs(3600));
        let cutoff = Utc::now() - chrono::Duration::hours(24);
        let mut tasks = state.tasks.lock().unwrap();
        tasks.retain(|_, task| {
            !(task.status.is_finished() && task.completed_at.is_some_and(|t| t < cutoff))
        });
    }
}

/// The document and config may each arrive either inline or as a
/// JSON-encoded string.
fn unwrap_json_value(value: Value) -> Result<Value, String> {
    match value {
        Value::String(text) => serde_json::from_str(&text).map_err(|e| e.to_string()),
        other => Ok(other),
    }
}

async fn index() -> impl Responder {
    HttpResponse::Ok().body("AARC to RC conversion server")
}

async fn create_task(state: web::Data<ServerState>, body: web::Bytes) -> impl Responder {
    let body: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(e) => return HttpResponse::BadRequest().body(format!("Invalid JSON: {e}")),
    };
    let Some(aarc) = body.get("aarc").cloned() else {
        return HttpResponse::BadRequest().body("Invalid request: missing 'aarc'.");
    };
    let aarc = match unwrap_json_value(aarc) {
        Ok(value) => value,
        Err(e) => return HttpResponse::BadRequest().body(format!("Invalid JSON format: {e}")),
    };
    let config = match unwrap_json_value(body.get("config").cloned().unwrap_or(Value::Null)) {
        Ok(value) => value,
        Err(e) => return HttpResponse::BadRequest().body(format!("Invalid JSON format: {e}")),
    };

    let key = uuid::Uuid::new_v4().simple().to_string();
    let cancel = Arc::new(AtomicBool::new(false));
    state.tasks.lock().unwrap().insert(
        key.clone(),
        Task {
            status: TaskStatus::Pending,
            result: None,
            error: None,
            completed_at: None,
        },
    );
    let job = Job {
        key: key.clone(),
        aarc,
        config,
        cancel,
    };
    if state.queue.lock().unwrap().send(job).is_err() {
        return HttpResponse::InternalServerError().body("Worker is not running.");
    }

    HttpResponse::Ok().json(json!({"key": key, "status": "pending"}))
}

async fn get_task(state: web::Data<ServerState>, body: web::Bytes) -> impl Responder {
    let body: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(_) => return HttpResponse::BadRequest().body("Invalid request: missing 'key'."),
    };
    let Some(key) = body.get("key").and_then(Value::as_str) else {
        return HttpResponse::BadRequest().body("Invalid request: missing 'key'.");
    };

    let tasks = state.tasks.lock().unwrap();
    let Some(task) = tasks.get(key) else {
        return HttpResponse::NotFound().body("Task not found.");
    };

    let mut response = json!({"key": key, "status": task.status.as_str()});
    match task.status {
        TaskStatus::Completed => {
            response["result"] = task.result.clone().unwrap_or(Value::Null);
        }
        TaskStatus::Failed | TaskStatus::Timeout => {
            response["error"] = json!(task.error.clone().unwrap_or_default());
        }
        _ => {}
    }
    HttpResponse::Ok().json(response)
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let (sender, receiver) = mpsc::channel::<Job>();
    let state = Arc::new(ServerState {
        tasks: Mutex::new(AHashMap::new()),
        queue: Mutex::new(sender),
    });

    {
        let worker_state = state.clone();
        thread::spawn(move || worker_loop(worker_state, receiver));
    }
    {
        let cleanup_state = state.clone();
        thread::spawn(move || cleanup_loop(cleanup_state));
    }

    info!("starting conversion server on {}:{}", args.address, args.port);
    let data = web::Data::from(state);
    HttpServer::new(move || {
        App::new()
            .wrap(Cors::permissive())
            .app_data(data.clone())
            .route("/", web::get().to(index))
            .route("/create", web::post().to(create_task))
            .route("/get", web::post().to(get_task))
    })
    .bind((args.address.as_str(), args.port))?
    .run()
    .await
}
