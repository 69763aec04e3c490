use anyhow::{Result, anyhow};
use log::{debug, error, info, warn};
use notify::{RecursiveMode, Watcher};
use signal_hook::{
    consts::{SIGINT, SIGTERM},
    iterator::Signals,
};
use std::{
    io::{self, BufRead, BufReader, Write},
    os::unix::net::{UnixListener, UnixStream},
    path::{Path, PathBuf},
    sync::mpsc::{self, Sender},
    thread,
    time::{Duration, Instant},
};

use super::pipeline::{DaemonEvent, Op, Pipeline};
use super::runtime::socket_path;
use crate::config::DaemonConfigState;

/// Editors write profiles in bursts; reload once things settle.
const RELOAD_DEBOUNCE: Duration = Duration::from_millis(250);

enum IpcMsg {
    Request(serde_json::Value, Sender<serde_json::Value>),
    Watch(UnixStream),
    ProfileChanged,
    Shutdown,
}

pub fn run_daemon() -> Result<()> {
    // Profile errors surface before a socket exists.
    let mut cfg = DaemonConfigState::load_or_install_default()?;
    info!("daemon: active profile '{}'", cfg.active_name);

    let sock = socket_path()?;
    let listener = bind_socket(&sock)?;
    info!("daemon: listening on {}", sock.display());
    let _socket = SocketGuard(sock.clone());

    let (tx_req, rx_req) = mpsc::channel::<IpcMsg>();
    let (tx_evt, rx_evt) = mpsc::channel::<DaemonEvent>();

    let pipeline = Pipeline::start(cfg.profile.clone(), tx_evt)?;

    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    let tx_sig = tx_req.clone();
    thread::spawn(move || {
        if let Some(sig) = signals.forever().next() {
            info!("daemon: caught signal {sig}");
            let _ = tx_sig.send(IpcMsg::Shutdown);
        }
    });

    let tx_fs = tx_req.clone();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        match res {
            Ok(ev) if ev.kind.is_modify() || ev.kind.is_create() => {
                if ev.paths.iter().any(|p| p.extension().is_some_and(|e| e == "toml")) {
                    let _ = tx_fs.send(IpcMsg::ProfileChanged);
                }
            }
            Ok(_) => {}
            Err(e) => warn!("profile watch error: {e}"),
        }
    })?;
    watcher.watch(&cfg.profiles_dir, RecursiveMode::NonRecursive)?;

    let mut watchers: Vec<UnixStream> = Vec::new();
    let mut reload_at: Option<Instant> = None;
    let mut shutting_down = false;

    listener.set_nonblocking(true)?;
    while !shutting_down {
        match listener.accept() {
            Ok((stream, _)) => {
                let tx = tx_req.clone();
                thread::spawn(move || {
                    if let Err(e) = handle_client(stream, tx) {
                        error!("ipc client error: {e}");
                    }
                });
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => error!("accept failed: {e}"),
        }

        while let Ok(evt) = rx_evt.try_recv() {
            broadcast(&mut watchers, evt);
        }

        while let Ok(msg) = rx_req.try_recv() {
            match msg {
                IpcMsg::Request(req, reply) => {
                    let (resp, stop) = handle_request(&mut cfg, &pipeline, &req);
                    let _ = reply.send(resp);
                    shutting_down |= stop;
                }
                IpcMsg::Watch(stream) => watchers.push(stream),
                IpcMsg::ProfileChanged => reload_at = Some(Instant::now() + RELOAD_DEBOUNCE),
                IpcMsg::Shutdown => shutting_down = true,
            }
        }

        if reload_at.is_some_and(|t| Instant::now() >= t) {
            reload_at = None;
            match cfg.reload() {
                Ok(()) => {
                    pipeline.update_profile(cfg.profile.clone());
                    info!("profile '{}' reloaded after change on disk", cfg.active_name);
                }
                Err(e) => error!("reload failed, keeping last good profile: {e}"),
            }
        }

        thread::sleep(Duration::from_millis(5));
    }

    info!("daemon: shutting down");
    pipeline.stop();
    Ok(())
}

/// Removes the socket file when the daemon returns, on error paths too.
struct SocketGuard(PathBuf);

impl Drop for SocketGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}

fn bind_socket(sock: &Path) -> Result<UnixListener> {
    if sock.exists() {
        let _ = std::fs::remove_file(sock);
    }
    Ok(UnixListener::bind(sock)?)
}

fn handle_client(mut stream: UnixStream, tx_req: Sender<IpcMsg>) -> Result<()> {
    stream.set_nonblocking(false)?;
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut line = String::new();
    reader.read_line(&mut line)?;
    if line.trim().is_empty() {
        return Ok(());
    }
    let req: serde_json::Value = match serde_json::from_str(&line) {
        Ok(v) => v,
        Err(e) => {
            writeln!(stream, "{}", respond(Err(anyhow!("bad request: {e}"))))?;
            return Ok(());
        }
    };

    if req.get("op").and_then(|v| v.as_str()) == Some("watch") {
        writeln!(stream, "{}", respond(Ok(serde_json::json!("watching"))))?;
        // A stalled watcher must not hold up the daemon loop.
        stream.set_write_timeout(Some(Duration::from_millis(200)))?;
        tx_req
            .send(IpcMsg::Watch(stream))
            .map_err(|_| anyhow!("daemon is shutting down"))?;
        return Ok(());
    }

    let (tx, rx) = mpsc::channel();
    tx_req
        .send(IpcMsg::Request(req, tx))
        .map_err(|_| anyhow!("daemon is shutting down"))?;
    let resp = rx.recv()?;
    writeln!(stream, "{resp}")?;
    Ok(())
}

fn handle_request(
    cfg: &mut DaemonConfigState,
    pipeline: &Pipeline,
    req: &serde_json::Value,
) -> (serde_json::Value, bool) {
    let op = req.get("op").and_then(|v| v.as_str()).unwrap_or("");
    if let Some(engine_op) = engine_op(op) {
        return (respond(pipeline.request(engine_op)), false);
    }

    let result = match op {
        "status" => pipeline.request(Op::Status).map(|engine| {
            serde_json::json!({
                "active_profile": cfg.active_name,
                "socket": socket_path().ok(),
                "devices": cfg.detected_devices,
                "engine": engine,
            })
        }),
        "reload" => cfg.reload().map(|()| {
            pipeline.update_profile(cfg.profile.clone());
            info!("profile reloaded");
            serde_json::json!({"active_profile": cfg.active_name})
        }),
        "use" => {
            let name = req.get("profile").and_then(|v| v.as_str()).unwrap_or("");
            cfg.set_active(name).map(|()| {
                pipeline.update_profile(cfg.profile.clone());
                info!("switched active profile to {}", cfg.active_name);
                serde_json::json!({"active_profile": cfg.active_name})
            })
        }
        "list" => Ok(serde_json::json!({
            "profiles": cfg.list_profiles(),
            "active": cfg.active_name,
        })),
        "doctor" => Ok(cfg.doctor_report()),
        "shutdown" => return (respond(Ok(serde_json::json!("shutting down"))), true),
        _ => Err(anyhow!("unknown op: {op}")),
    };
    (respond(result), false)
}

fn engine_op(op: &str) -> Option<Op> {
    match op {
        "record" => Some(Op::Record),
        "cancel" => Some(Op::Cancel),
        "listen" => Some(Op::Listen),
        "unlisten" => Some(Op::Unlisten),
        "reset" => Some(Op::Reset),
        _ => None,
    }
}

fn respond(result: Result<serde_json::Value>) -> serde_json::Value {
    match result {
        Ok(data) => serde_json::json!({"ok": true, "data": data}),
        Err(e) => serde_json::json!({"ok": false, "error": e.to_string()}),
    }
}

fn broadcast(watchers: &mut Vec<UnixStream>, evt: DaemonEvent) {
    let line = match evt {
        DaemonEvent::Recognized(v) => {
            info!("[gesture] {v}");
            v
        }
        DaemonEvent::Engine(v) => {
            debug!("[engine] {v}");
            v
        }
    };
    watchers.retain_mut(|w| writeln!(w, "{line}").is_ok());
}

pub fn client_request(req: serde_json::Value) -> Result<serde_json::Value> {
    let mut stream = connect()?;
    let line = serde_json::to_string(&req)? + "\n";
    stream.write_all(line.as_bytes())?;
    let mut reader = BufReader::new(stream);
    let mut resp = String::new();
    reader.read_line(&mut resp)?;
    let v: serde_json::Value = serde_json::from_str(&resp)?;
    Ok(v)
}

/// Print every event line the daemon pushes until it hangs up.
pub fn watch() -> Result<()> {
    let mut stream = connect()?;
    stream.write_all(b"{\"op\":\"watch\"}\n")?;
    let reader = BufReader::new(stream);
    for line in reader.lines() {
        println!("{}", line?);
    }
    Ok(())
}

fn connect() -> Result<UnixStream> {
    let sock = socket_path()?;
    if !sock.exists() {
        return Err(anyhow!(
            "airgestd daemon is not running (socket missing at {})",
            sock.display()
        ));
    }
    Ok(UnixStream::connect(sock)?)
}
