pub mod audio;
pub mod config;
pub mod environment;
pub mod error;
pub mod feedback;
pub mod gateway;
pub mod questions;
pub mod runtime_log;
pub mod session;
pub mod settings_store;

#[cfg(feature = "desktop")]
use audio::{InputMicrophone, MicrophoneRecorder};
#[cfg(feature = "desktop")]
use config::{CoachSettings, QuestionOrder};
#[cfg(feature = "desktop")]
use environment::EnvironmentHealth;
#[cfg(feature = "desktop")]
use gateway::{build_runtime_evaluator, run_evaluation, Evaluator, RuntimeEvaluator};
#[cfg(feature = "desktop")]
use questions::Question;
#[cfg(feature = "desktop")]
use runtime_log::{self as log_store, LogLevel, RuntimeLogEntry};
#[cfg(feature = "desktop")]
use serde::Serialize;
#[cfg(feature = "desktop")]
use session::{PracticeSession, SessionController};
#[cfg(feature = "desktop")]
use settings_store::CoachSettingsPatch;
#[cfg(feature = "desktop")]
use std::path::PathBuf;
#[cfg(feature = "desktop")]
use std::sync::Mutex;
#[cfg(feature = "desktop")]
use tauri::Emitter;

#[cfg(feature = "desktop")]
const SESSION_EVENT: &str = "coach:session";

#[cfg(feature = "desktop")]
struct PracticeState {
    controller: SessionController,
    recorder: MicrophoneRecorder,
}

#[cfg(feature = "desktop")]
struct PracticeStore {
    practice: Mutex<PracticeState>,
}

#[cfg(feature = "desktop")]
impl PracticeStore {
    fn new(question: Question, microphone_id: Option<String>) -> Self {
        Self {
            practice: Mutex::new(PracticeState {
                controller: SessionController::new(question),
                recorder: MicrophoneRecorder::new(microphone_id),
            }),
        }
    }
}

#[cfg(feature = "desktop")]
struct SettingsState {
    settings: Mutex<CoachSettings>,
    settings_path: PathBuf,
}

#[cfg(feature = "desktop")]
impl SettingsState {
    fn new(settings: CoachSettings, settings_path: PathBuf) -> Self {
        Self {
            settings: Mutex::new(settings),
            settings_path,
        }
    }
}

#[cfg(feature = "desktop")]
struct EvaluatorState {
    evaluator: Mutex<RuntimeEvaluator>,
}

#[cfg(feature = "desktop")]
struct RuntimeLogState {
    path: PathBuf,
}

#[cfg(feature = "desktop")]
#[derive(Clone, Serialize)]
struct EvaluatorStatus {
    ready: bool,
    label: String,
    description: String,
}

#[cfg(feature = "desktop")]
fn lock_error(what: &str) -> String {
    format!("failed to acquire {what} state")
}

#[cfg(feature = "desktop")]
fn emit_session(app: &tauri::AppHandle, snapshot: &PracticeSession) {
    if let Err(error) = app.emit(SESSION_EVENT, snapshot) {
        log::warn!("failed to emit session event: {error}");
    }
}

#[cfg(feature = "desktop")]
#[tauri::command]
fn health_check() -> &'static str {
    "ok"
}

#[cfg(feature = "desktop")]
#[tauri::command]
fn get_default_settings() -> CoachSettings {
    CoachSettings::default()
}

#[cfg(feature = "desktop")]
#[tauri::command]
fn get_settings(state: tauri::State<'_, SettingsState>) -> Result<CoachSettings, String> {
    let settings = state.settings.lock().map_err(|_| lock_error("settings"))?;
    Ok(settings.clone())
}

#[cfg(feature = "desktop")]
#[tauri::command]
fn update_settings(
    settings_state: tauri::State<'_, SettingsState>,
    evaluator_state: tauri::State<'_, EvaluatorState>,
    store: tauri::State<'_, PracticeStore>,
    logs: tauri::State<'_, RuntimeLogState>,
    patch: CoachSettingsPatch,
) -> Result<CoachSettings, String> {
    let mut settings = settings_state
        .settings
        .lock()
        .map_err(|_| lock_error("settings"))?;
    let updated = settings_store::apply_patch(&settings, patch);
    settings_store::save(&settings_state.settings_path, &updated)?;
    *settings = updated.clone();

    let runtime = build_runtime_evaluator(&updated, environment::api_key_from_env());
    let description = runtime.description();
    *evaluator_state
        .evaluator
        .lock()
        .map_err(|_| lock_error("evaluator"))? = runtime;

    store
        .practice
        .lock()
        .map_err(|_| lock_error("practice"))?
        .recorder
        .set_microphone(updated.microphone_id.clone());

    let _ = log_store::append(
        &logs.path,
        LogLevel::Info,
        "settings.update",
        &format!("updated settings; evaluator {description}"),
    );

    Ok(updated)
}

#[cfg(feature = "desktop")]
#[tauri::command]
fn list_questions() -> Vec<Question> {
    questions::all_questions()
}

#[cfg(feature = "desktop")]
#[tauri::command]
fn get_session(store: tauri::State<'_, PracticeStore>) -> Result<PracticeSession, String> {
    let practice = store.practice.lock().map_err(|_| lock_error("practice"))?;
    Ok(practice.controller.snapshot())
}

#[cfg(feature = "desktop")]
#[tauri::command]
fn select_question(
    app: tauri::AppHandle,
    store: tauri::State<'_, PracticeStore>,
    settings_state: tauri::State<'_, SettingsState>,
    logs: tauri::State<'_, RuntimeLogState>,
    id: Option<String>,
) -> Result<PracticeSession, String> {
    let order = settings_state
        .settings
        .lock()
        .map_err(|_| lock_error("settings"))?
        .question_order;

    let mut practice = store.practice.lock().map_err(|_| lock_error("practice"))?;
    let question = match id {
        Some(id) => questions::find_question(&id).ok_or_else(|| format!("unknown question id {id}"))?,
        None => match order {
            QuestionOrder::Random => questions::random_question(&mut rand::thread_rng()),
            QuestionOrder::Sequential => questions::next_question(&practice.controller.question().id),
        },
    };

    let PracticeState {
        controller,
        recorder,
    } = &mut *practice;
    controller.select_question(question, recorder);
    let snapshot = controller.snapshot();
    drop(practice);

    let _ = log_store::append(
        &logs.path,
        LogLevel::Info,
        "session.question",
        &format!("selected question {} ({})", snapshot.question.id, snapshot.question.topic),
    );
    emit_session(&app, &snapshot);
    Ok(snapshot)
}

#[cfg(feature = "desktop")]
#[tauri::command]
fn start_recording(
    app: tauri::AppHandle,
    store: tauri::State<'_, PracticeStore>,
    logs: tauri::State<'_, RuntimeLogState>,
) -> Result<PracticeSession, String> {
    let mut practice = store.practice.lock().map_err(|_| lock_error("practice"))?;
    let PracticeState {
        controller,
        recorder,
    } = &mut *practice;

    match controller.start_recording(recorder) {
        Ok(true) => {
            let _ = log_store::append(&logs.path, LogLevel::Info, "capture.start", "recording started");
        }
        Ok(false) => {}
        Err(error) => {
            let _ = log_store::append(&logs.path, LogLevel::Warn, "capture.denied", &error.to_string());
        }
    }

    let snapshot = controller.snapshot();
    drop(practice);
    emit_session(&app, &snapshot);
    Ok(snapshot)
}

/// Finalizes the take, then awaits the model without holding the session lock.
#[cfg(feature = "desktop")]
#[tauri::command]
async fn stop_recording(
    app: tauri::AppHandle,
    store: tauri::State<'_, PracticeStore>,
    evaluator_state: tauri::State<'_, EvaluatorState>,
    logs: tauri::State<'_, RuntimeLogState>,
) -> Result<PracticeSession, String> {
    let (request, processing) = {
        let mut practice = store.practice.lock().map_err(|_| lock_error("practice"))?;
        let PracticeState {
            controller,
            recorder,
        } = &mut *practice;

        match controller.stop_recording(recorder) {
            Ok(Some(request)) => (request, controller.snapshot()),
            Ok(None) => return Ok(controller.snapshot()),
            Err(error) => {
                let _ = log_store::append(
                    &logs.path,
                    LogLevel::Warn,
                    "capture.finalize",
                    &error.to_string(),
                );
                let snapshot = controller.snapshot();
                drop(practice);
                emit_session(&app, &snapshot);
                return Ok(snapshot);
            }
        }
    };
    emit_session(&app, &processing);

    let evaluator = evaluator_state
        .evaluator
        .lock()
        .map_err(|_| lock_error("evaluator"))?
        .clone();
    let attempt = request.target.attempt_kind();
    let result = run_evaluation(&evaluator, &request).await;

    match &result {
        Ok(feedback) => {
            let _ = log_store::append(
                &logs.path,
                LogLevel::Info,
                "evaluation.finished",
                &format!("{attempt:?} scored band {} by {}", feedback.band_score, evaluator.label()),
            );
        }
        Err(error) => {
            let _ = log_store::append(
                &logs.path,
                LogLevel::Error,
                "evaluation.failed",
                &format!("{attempt:?}: {}", error.cause),
            );
        }
    }

    let snapshot = {
        let mut practice = store.practice.lock().map_err(|_| lock_error("practice"))?;
        if !practice.controller.complete_evaluation(request.ticket, result) {
            log::info!("dropped evaluation result for reset attempt {}", request.ticket);
        }
        practice.controller.snapshot()
    };
    emit_session(&app, &snapshot);
    Ok(snapshot)
}

#[cfg(feature = "desktop")]
#[tauri::command]
fn restart_session(
    app: tauri::AppHandle,
    store: tauri::State<'_, PracticeStore>,
) -> Result<PracticeSession, String> {
    let snapshot = {
        let mut practice = store.practice.lock().map_err(|_| lock_error("practice"))?;
        practice.controller.restart();
        practice.controller.snapshot()
    };
    emit_session(&app, &snapshot);
    Ok(snapshot)
}

#[cfg(feature = "desktop")]
#[tauri::command]
fn list_microphones() -> Result<Vec<InputMicrophone>, String> {
    audio::list_input_microphones().map_err(|error| error.to_string())
}

#[cfg(feature = "desktop")]
#[tauri::command]
fn get_environment_health() -> EnvironmentHealth {
    environment::detect_environment_health()
}

#[cfg(feature = "desktop")]
#[tauri::command]
fn get_evaluator_status(state: tauri::State<'_, EvaluatorState>) -> Result<EvaluatorStatus, String> {
    let evaluator = state.evaluator.lock().map_err(|_| lock_error("evaluator"))?;
    Ok(EvaluatorStatus {
        ready: evaluator.is_ready(),
        label: evaluator.label(),
        description: evaluator.description(),
    })
}

#[cfg(feature = "desktop")]
#[tauri::command]
fn get_runtime_logs(
    logs: tauri::State<'_, RuntimeLogState>,
    limit: Option<usize>,
) -> Result<Vec<RuntimeLogEntry>, String> {
    let normalized_limit = limit.unwrap_or(40).clamp(1, 200);
    log_store::read_recent(&logs.path, normalized_limit)
}

#[cfg(feature = "desktop")]
#[tauri::command]
fn clear_runtime_logs(logs: tauri::State<'_, RuntimeLogState>) -> Result<(), String> {
    log_store::clear(&logs.path)
}

#[cfg(feature = "desktop")]
#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    if let Err(error) = dotenvy::dotenv() {
        log::debug!("no .env file loaded: {error}");
    }

    let settings_path = settings_store::default_settings_path();
    let settings = settings_store::load_or_default(&settings_path);
    let logs_path = log_store::default_log_path();

    let evaluator = build_runtime_evaluator(&settings, environment::api_key_from_env());
    let _ = log_store::append(&logs_path, LogLevel::Info, "app.start", "application startup");
    let _ = log_store::append(
        &logs_path,
        if evaluator.is_ready() {
            LogLevel::Info
        } else {
            LogLevel::Warn
        },
        "evaluator.setup",
        &evaluator.description(),
    );

    let practice = PracticeStore::new(questions::first_question(), settings.microphone_id.clone());

    tauri::Builder::default()
        .manage(practice)
        .manage(SettingsState::new(settings, settings_path))
        .manage(EvaluatorState {
            evaluator: Mutex::new(evaluator),
        })
        .manage(RuntimeLogState { path: logs_path })
        .plugin(tauri_plugin_opener::init())
        .invoke_handler(tauri::generate_handler![
            health_check,
            get_default_settings,
            get_settings,
            update_settings,
            list_questions,
            get_session,
            select_question,
            start_recording,
            stop_recording,
            restart_session,
            list_microphones,
            get_environment_health,
            get_evaluator_status,
            get_runtime_logs,
            clear_runtime_logs
        ])
        .run(tauri::generate_context!())
        .expect("error while running tauri application");
}

#[cfg(not(feature = "desktop"))]
pub fn run() {}
