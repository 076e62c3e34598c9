// 该文件是 Hushen （护身） 项目的一部分。
// src/server.rs - HTTP 服务
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Hushen 项目贡献者

//! actix-web 服务运行在独立线程的 System 中。任务处理和实时流都是阻塞的：
//! 任务通过 `web::block` 执行，每条实时流在自己的线程里打开摄像头并拉取帧，
//! 经有界通道交给响应体。

use std::{
  net::{SocketAddr, TcpListener},
  sync::Arc,
  thread::{self, JoinHandle},
  time::{Duration, Instant},
};

use actix_multipart::Multipart;
use actix_web::{
  App, HttpRequest, HttpResponse, HttpServer,
  http::{StatusCode, header},
  web::{self, Bytes},
};
use async_stream::stream;
use futures_util::{Stream, StreamExt};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error, info, warn};

use crate::{
  config::MAX_UPLOAD_BYTES,
  input::{CameraCandidate, CameraDriver, guess_content_type},
  model::MODEL_NOT_LOADED,
  output::{Annotator, mjpeg::STREAM_CONTENT_TYPE},
  pipeline::{JobError, JobPipeline, Upload, ValidationError},
  store::JobId,
  stream::{CancelToken, FrameStream, StreamOptions},
};

/// 客户端停止读取后，实时流最多等待这么久就放弃并释放摄像头
pub const STREAM_STALL_TIMEOUT: Duration = Duration::from_secs(10);

// 每条实时流在通道中缓存的帧数
const STREAM_BUFFER_CHUNKS: usize = 2;
const SEND_RETRY_INTERVAL: Duration = Duration::from_millis(20);
const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(50);
const SHUTDOWN_TIMEOUT_SECS: u64 = 2;
const UPLOAD_FIELD: &str = "file";

#[derive(Error, Debug)]
pub enum ServerError {
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("地址无效: {0}")]
  InvalidAddress(String),
  #[error("服务线程异常退出")]
  Panicked,
}

/// 各请求共享的服务状态
pub struct AppState {
  pub pipeline: Arc<JobPipeline>,
  pub driver: Arc<dyn CameraDriver>,
  pub candidates: Vec<CameraCandidate>,
  pub annotator: Annotator,
  pub stream_options: StreamOptions,
  /// 客户端停止读取时实时流的最长等待
  pub stall_timeout: Duration,
  pub shutdown: CancelToken,
}

/// 实时流停止发送的原因
#[derive(Error, Debug, PartialEq, Eq)]
enum StreamStop {
  #[error("客户端断开")]
  Disconnected,
  #[error("客户端 {0:?} 内未读取数据")]
  Stalled(Duration),
  #[error("服务关闭")]
  Shutdown,
}

#[derive(Error, Debug)]
enum UploadError {
  #[error("上传读取失败: {0}")]
  Payload(String),
  #[error(transparent)]
  Validation(#[from] ValidationError),
}

#[derive(Deserialize)]
struct UploadQuery {
  name: Option<String>,
}

/// 注册所有路由。未匹配的路径由 [`not_found`] 处理
pub fn routes(cfg: &mut web::ServiceConfig) {
  cfg
    .service(
      web::resource("/")
        .route(web::get().to(index))
        .default_service(web::to(method_not_allowed)),
    )
    .service(
      web::resource("/webcam")
        .route(web::get().to(webcam))
        .default_service(web::to(method_not_allowed)),
    )
    .service(
      web::resource("/webcam_feed")
        .route(web::get().to(webcam_feed))
        .default_service(web::to(method_not_allowed)),
    )
    .service(
      web::resource("/upload")
        .route(web::post().to(upload))
        .default_service(web::to(method_not_allowed)),
    )
    .service(
      web::resource("/files")
        .route(web::get().to(list_files))
        .default_service(web::to(method_not_allowed)),
    )
    .service(
      web::resource("/files/{id}")
        .route(web::delete().to(delete_file))
        .default_service(web::to(method_not_allowed)),
    )
    .service(
      web::resource("/files/{id}/delete")
        .route(web::post().to(delete_file))
        .default_service(web::to(method_not_allowed)),
    )
    .service(
      web::resource("/media/{relative:.+}")
        .route(web::get().to(media))
        .default_service(web::to(method_not_allowed)),
    );
}

fn error_response(status: StatusCode, message: &str) -> HttpResponse {
  HttpResponse::build(status).json(serde_json::json!({ "error": message }))
}

fn job_error_response(err: &JobError) -> HttpResponse {
  let status = match err {
    JobError::Validation(_) => StatusCode::BAD_REQUEST,
    JobError::EngineUnavailable => StatusCode::SERVICE_UNAVAILABLE,
    JobError::NotFound(_) => StatusCode::NOT_FOUND,
    JobError::Inference { .. } | JobError::Storage { .. } | JobError::Store { .. } => {
      StatusCode::INTERNAL_SERVER_ERROR
    }
  };
  error_response(status, &err.to_string())
}

fn blocking_error_response(err: &actix_web::error::BlockingError) -> HttpResponse {
  error!("后台任务执行失败: {}", err);
  error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
}

pub async fn not_found() -> HttpResponse {
  error_response(StatusCode::NOT_FOUND, "not found")
}

async fn method_not_allowed() -> HttpResponse {
  error_response(StatusCode::METHOD_NOT_ALLOWED, "method not allowed")
}

async fn index() -> HttpResponse {
  HttpResponse::Ok()
    .content_type("text/html; charset=utf-8")
    .body(INDEX_PAGE)
}

async fn webcam() -> HttpResponse {
  HttpResponse::Ok()
    .content_type("text/html; charset=utf-8")
    .body(WEBCAM_PAGE)
}

/// 读取请求体，超过上传上限时立即停止
async fn read_capped<S, E>(body: &mut S) -> Result<Vec<u8>, UploadError>
where
  S: Stream<Item = Result<Bytes, E>> + Unpin,
  E: std::fmt::Display,
{
  let mut bytes = Vec::new();
  while let Some(chunk) = body.next().await {
    let chunk = chunk.map_err(|e| UploadError::Payload(e.to_string()))?;
    if bytes.len() + chunk.len() > MAX_UPLOAD_BYTES {
      return Err(ValidationError::TooLarge(bytes.len() + chunk.len()).into());
    }
    bytes.extend_from_slice(&chunk);
  }
  Ok(bytes)
}

/// 取 `file` 字段，其余字段读完丢弃。没有该字段时返回空上传
async fn read_multipart(mut form: Multipart) -> Result<Upload, UploadError> {
  let mut upload = Upload::default();
  while let Some(field) = form.next().await {
    let mut field = field.map_err(|e| UploadError::Payload(e.to_string()))?;
    let disposition = field.content_disposition();
    let name = disposition.and_then(|d| d.get_name()).map(str::to_string);
    let file_name = disposition.and_then(|d| d.get_filename()).map(str::to_string);
    let content_type = field.content_type().map(|m| m.to_string());

    let bytes = read_capped(&mut field).await?;
    if name.as_deref() == Some(UPLOAD_FIELD) && upload.bytes.is_empty() {
      upload = Upload {
        file_name: file_name.unwrap_or_default(),
        content_type,
        bytes,
      };
    }
  }
  Ok(upload)
}

async fn upload(
  state: web::Data<AppState>,
  request: HttpRequest,
  query: web::Query<UploadQuery>,
  mut payload: web::Payload,
) -> HttpResponse {
  let content_type = request
    .headers()
    .get(header::CONTENT_TYPE)
    .and_then(|v| v.to_str().ok())
    .unwrap_or("")
    .to_string();

  let upload = if content_type
    .to_ascii_lowercase()
    .starts_with("multipart/form-data")
  {
    read_multipart(Multipart::new(request.headers(), payload)).await
  } else {
    let file_name = query
      .into_inner()
      .name
      .or_else(|| {
        request
          .headers()
          .get("x-file-name")
          .and_then(|v| v.to_str().ok())
          .map(str::to_string)
      })
      .unwrap_or_default();
    read_capped(&mut payload).await.map(|bytes| Upload {
      file_name,
      content_type: (!content_type.is_empty()).then_some(content_type),
      bytes,
    })
  };

  let upload = match upload {
    Ok(upload) => upload,
    Err(UploadError::Validation(e)) => return job_error_response(&JobError::Validation(e)),
    Err(e) => {
      warn!("{}", e);
      return error_response(StatusCode::BAD_REQUEST, &e.to_string());
    }
  };

  let pipeline = state.pipeline.clone();
  match web::block(move || pipeline.submit(upload)).await {
    Ok(Ok(outcome)) => HttpResponse::Ok().json(outcome),
    Ok(Err(e)) => job_error_response(&e),
    Err(e) => blocking_error_response(&e),
  }
}

async fn list_files(state: web::Data<AppState>) -> HttpResponse {
  let pipeline = state.pipeline.clone();
  match web::block(move || pipeline.list_jobs()).await {
    Ok(Ok(jobs)) => HttpResponse::Ok().json(jobs),
    Ok(Err(e)) => job_error_response(&e),
    Err(e) => blocking_error_response(&e),
  }
}

async fn delete_file(state: web::Data<AppState>, id: web::Path<JobId>) -> HttpResponse {
  let id = id.into_inner();
  let pipeline = state.pipeline.clone();
  match web::block(move || pipeline.delete_job(id)).await {
    Ok(Ok(())) => HttpResponse::Ok().json(serde_json::json!({ "deleted": id })),
    Ok(Err(e)) => job_error_response(&e),
    Err(e) => blocking_error_response(&e),
  }
}

async fn media(state: web::Data<AppState>, relative: web::Path<String>) -> HttpResponse {
  let relative = relative.into_inner();
  let Some(path) = state.pipeline.artifacts().resolve(&relative) else {
    warn!("拒绝访问媒体路径: {}", relative);
    return error_response(StatusCode::NOT_FOUND, "not found");
  };

  let content_type = guess_content_type(&path).unwrap_or("application/octet-stream");
  match web::block(move || std::fs::read(path)).await {
    Ok(Ok(bytes)) => HttpResponse::Ok().content_type(content_type).body(bytes),
    Ok(Err(_)) => error_response(StatusCode::NOT_FOUND, "not found"),
    Err(e) => blocking_error_response(&e),
  }
}

async fn webcam_feed(state: web::Data<AppState>) -> HttpResponse {
  if !state.pipeline.engine().is_available() {
    return HttpResponse::ServiceUnavailable()
      .content_type("text/plain; charset=utf-8")
      .body(MODEL_NOT_LOADED);
  }

  let (tx, mut rx) = mpsc::channel::<Bytes>(STREAM_BUFFER_CHUNKS);
  let worker = state.clone();
  let spawned = thread::Builder::new()
    .name("hushen-stream".into())
    .spawn(move || pump_stream(&worker, &tx));
  if let Err(e) = spawned {
    error!("无法启动实时流线程: {}", e);
    return error_response(StatusCode::INTERNAL_SERVER_ERROR, "stream unavailable");
  }

  let body = stream! {
    while let Some(chunk) = rx.recv().await {
      yield Ok::<Bytes, actix_web::Error>(chunk);
    }
  };

  HttpResponse::Ok()
    .append_header((header::CACHE_CONTROL, "no-cache"))
    .content_type(STREAM_CONTENT_TYPE)
    .streaming(body)
}

/// 打开实时流并把帧送入通道。任何原因停止发送时流随之 drop，摄像头被释放
fn pump_stream(state: &AppState, tx: &mpsc::Sender<Bytes>) {
  let stream = FrameStream::open(
    state.driver.as_ref(),
    &state.candidates,
    state.pipeline.engine().clone(),
    state.annotator.clone(),
    state.stream_options,
    state.shutdown.clone(),
  );

  for chunk in stream {
    if let Err(reason) = deliver(tx, Bytes::from(chunk), &state.shutdown, state.stall_timeout) {
      info!("实时流停止: {}", reason);
      break;
    }
  }
  debug!("实时流线程退出");
}

/// 通道满时重试，直到客户端读走数据、断开、超时或服务关闭
fn deliver(
  tx: &mpsc::Sender<Bytes>,
  chunk: Bytes,
  shutdown: &CancelToken,
  stall_timeout: Duration,
) -> Result<(), StreamStop> {
  let deadline = Instant::now() + stall_timeout;
  let mut pending = chunk;
  loop {
    match tx.try_send(pending) {
      Ok(()) => return Ok(()),
      Err(TrySendError::Closed(_)) => return Err(StreamStop::Disconnected),
      Err(TrySendError::Full(chunk)) => {
        if Instant::now() >= deadline {
          return Err(StreamStop::Stalled(stall_timeout));
        }
        if shutdown.wait_timeout(SEND_RETRY_INTERVAL) {
          return Err(StreamStop::Shutdown);
        }
        pending = chunk;
      }
    }
  }
}

pub struct Server {
  state: Arc<AppState>,
  bind: String,
}

pub struct ServerHandle {
  addr: SocketAddr,
  shutdown: CancelToken,
  join: Option<JoinHandle<()>>,
}

impl ServerHandle {
  pub fn addr(&self) -> SocketAddr {
    self.addr
  }

  /// 阻塞直到服务停止
  pub fn wait(mut self) -> Result<(), ServerError> {
    match self.join.take() {
      Some(join) => join.join().map_err(|_| ServerError::Panicked),
      None => Ok(()),
    }
  }

  pub fn stop(self) -> Result<(), ServerError> {
    self.shutdown.cancel();
    self.wait()
  }
}

impl Server {
  pub fn new(state: AppState, bind: impl Into<String>) -> Self {
    Self {
      state: Arc::new(state),
      bind: bind.into(),
    }
  }

  /// 在独立线程中运行服务，取消标记被触发后平滑退出
  pub fn spawn(self) -> Result<ServerHandle, ServerError> {
    let addr: SocketAddr = self
      .bind
      .parse()
      .map_err(|_| ServerError::InvalidAddress(self.bind.clone()))?;
    let listener = TcpListener::bind(addr)?;
    listener.set_nonblocking(true)?;
    let addr = listener.local_addr()?;

    let shutdown = self.state.shutdown.clone();
    let watch = shutdown.clone();
    let state = web::Data::from(self.state);
    let join = thread::Builder::new()
      .name("hushen-http".into())
      .spawn(move || {
        let result = actix_web::rt::System::new().block_on(async move {
          let server = HttpServer::new(move || {
            App::new()
              .app_data(state.clone())
              .configure(routes)
              .default_service(web::to(not_found))
          })
          .disable_signals()
          .shutdown_timeout(SHUTDOWN_TIMEOUT_SECS)
          .listen(listener)?
          .run();

          let handle = server.handle();
          actix_web::rt::spawn(async move {
            while !watch.is_cancelled() {
              actix_web::rt::time::sleep(SHUTDOWN_POLL_INTERVAL).await;
            }
            info!("HTTP 服务退出");
            handle.stop(true).await;
          });

          server.await
        });
        if let Err(e) = result {
          error!("HTTP 服务停止: {}", e);
        }
      })?;
    info!("HTTP 服务监听 http://{}", addr);

    Ok(ServerHandle {
      addr,
      shutdown,
      join: Some(join),
    })
  }
}

const INDEX_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>PPE Detection</title></head>
<body>
<h1>PPE Detection</h1>
<form action="/upload" method="post" enctype="multipart/form-data">
  <input type="file" name="file" accept="image/*">
  <button type="submit">Detect</button>
</form>
<p><a href="/webcam">Live camera</a> | <a href="/files">Previous uploads</a></p>
</body>
</html>
"#;

const WEBCAM_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>Live PPE Detection</title></head>
<body>
<h1>Live PPE Detection</h1>
<img src="/webcam_feed" width="640" height="480" alt="live stream">
<p><a href="/">Back</a></p>
</body>
</html>
"#;
