use crate::archive;
use crate::config::{Endpoint, SessionOptions};
use crate::dispatch::{Dispatcher, Headers, InvokeResponse, QueryParams};
use crate::emulator::{Emulator, Observer};
use crate::names::NameMapping;
use crate::template::Template;
use crate::types::Functions;
use crate::{Error, Result};
use hyper::body::Bytes;
use hyper::Response;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// Where a session is in its life: `Unstarted -> Running -> Stopped`, no way back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unstarted,
    Running,
    Stopped,
}

impl SessionState {
    fn as_str(&self) -> &'static str {
        match self {
            SessionState::Unstarted => "unstarted",
            SessionState::Running => "running",
            SessionState::Stopped => "stopped",
        }
    }
}

enum State {
    Unstarted,
    Running(Running),
    Stopped,
}

struct Running {
    endpoint: Endpoint,
    emulator: Emulator,
    dispatcher: Dispatcher,
}

/// One emulator process serving a fixed set of functions from its own working directory.
pub struct Session {
    base_dir: PathBuf,
    /// Removed on `stop()` or when the session is dropped
    workdir: Option<TempDir>,
    workdir_path: PathBuf,
    template_path: PathBuf,
    names: NameMapping,
    options: SessionOptions,
    observer: Option<Observer>,
    state: State,
}

impl Session {
    /// Prepares everything the emulator needs, but does not start it:
    /// - creates a working directory inside `base_dir`
    /// - unpacks every artifact into `<workdir>/<function id>/`
    /// - writes `<workdir>/template.yml`
    ///
    /// Artifact paths are relative to `base_dir`. Any failure removes the working directory.
    pub fn generate(base_dir: impl AsRef<Path>, functions: &Functions, options: SessionOptions) -> Result<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();

        let workdir = tempfile::Builder::new().prefix(".lambda-local-").tempdir_in(&base_dir)?;
        let workdir_path = workdir.path().to_path_buf();
        debug!("Working directory: {}", workdir_path.display());

        let names = NameMapping::generate(functions);

        for (key, desc) in functions {
            let id = names
                .id_of(key)
                .ok_or_else(|| Error::InvalidRequest(format!("No ID was generated for {key}")))?;
            archive::extract(&base_dir.join(&desc.filename), &workdir_path.join(id))?;
        }

        let template_path = Template::build(functions, &names).write_to(&workdir_path)?;

        info!("Generated {} function(s) in {}", names.len(), workdir_path.display());

        Ok(Self {
            base_dir,
            workdir: Some(workdir),
            workdir_path,
            template_path,
            names,
            options,
            observer: None,
            state: State::Unstarted,
        })
    }

    /// Emulator output and exit notifications go to `observer` once the session is started.
    pub fn with_observer(mut self, observer: Observer) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Launches the emulator and returns its base URL, e.g. `http://127.0.0.1:3000`.
    ///
    /// Host, port and region come from the options or their defaults.
    /// If the options have a `ready_timeout`, this waits until the emulator accepts connections.
    /// On failure the session stays unstarted and no process is left behind.
    pub async fn start(&mut self) -> Result<String> {
        if !matches!(self.state, State::Unstarted) {
            return Err(self.invalid_state("start"));
        }

        let endpoint = self.options.resolve_endpoint()?;

        let emulator = Emulator::spawn(
            &self.options.emulator,
            &self.workdir_path,
            &self.template_path,
            &endpoint,
            &self.options.extra_args,
            self.observer.clone(),
        )?;

        if let Some(timeout) = self.options.ready_timeout {
            if let Err(e) = emulator.wait_until_ready(&endpoint, timeout).await {
                if let Err(kill_err) = emulator.kill().await {
                    warn!("Failed to kill the emulator after a failed start: {kill_err}");
                }
                return Err(e);
            }
        }

        let url = endpoint.url();
        info!("Emulator listening on {url}");

        self.state = State::Running(Running {
            dispatcher: Dispatcher::new(&endpoint.host, endpoint.port),
            endpoint,
            emulator,
        });

        Ok(url)
    }

    /// Kills the emulator, waits for it to exit and removes the working directory.
    pub async fn stop(&mut self) -> Result<()> {
        let running = match std::mem::replace(&mut self.state, State::Stopped) {
            State::Running(v) => v,
            other => {
                self.state = other;
                return Err(self.invalid_state("stop"));
            }
        };

        let code = running.emulator.kill().await?;
        debug!("Emulator exit code: {:?}", code);

        if let Some(workdir) = self.workdir.take() {
            workdir.close().map_err(Error::Teardown)?;
        }

        info!("Session stopped");

        Ok(())
    }

    /// Invokes a function directly by its generated ID. See [Dispatcher::send_request].
    pub async fn send_request(
        &self,
        function_id: &str,
        path: &str,
        headers: Option<&Headers>,
        query: Option<&QueryParams>,
    ) -> Result<InvokeResponse> {
        self.dispatcher("send a request to")?
            .send_request(function_id, path, headers, query)
            .await
    }

    /// Same as [Session::send_request], but looks the ID up by the logical key, e.g. `greet`.
    pub async fn send_request_by_key(
        &self,
        key: &str,
        path: &str,
        headers: Option<&Headers>,
        query: Option<&QueryParams>,
    ) -> Result<InvokeResponse> {
        let id = self
            .names
            .id_of(key)
            .ok_or_else(|| Error::InvalidRequest(format!("Unknown function: {key}")))?;
        self.send_request(id, path, headers, query).await
    }

    /// Sends a GET request to the HTTP API of the emulator. See [Dispatcher::send_api_gw_request].
    pub async fn send_api_gw_request(&self, path: &str, headers: Option<&Headers>) -> Result<Response<Bytes>> {
        self.dispatcher("send a request to")?.send_api_gw_request(path, headers).await
    }

    /// `/<logical key>` -> generated function ID
    pub fn names(&self) -> &NameMapping {
        &self.names
    }

    pub fn state(&self) -> SessionState {
        match self.state {
            State::Unstarted => SessionState::Unstarted,
            State::Running(_) => SessionState::Running,
            State::Stopped => SessionState::Stopped,
        }
    }

    /// The directory artifacts are resolved against.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// No longer exists once the session is stopped.
    pub fn working_dir(&self) -> &Path {
        &self.workdir_path
    }

    pub fn template_path(&self) -> &Path {
        &self.template_path
    }

    /// Host, port and region of the running emulator.
    pub fn endpoint(&self) -> Option<&Endpoint> {
        match &self.state {
            State::Running(running) => Some(&running.endpoint),
            _ => None,
        }
    }

    /// PID of the emulator process while it is running.
    pub fn emulator_pid(&self) -> Option<u32> {
        match &self.state {
            State::Running(running) => running.emulator.pid(),
            _ => None,
        }
    }

    fn dispatcher(&self, operation: &'static str) -> Result<&Dispatcher> {
        match &self.state {
            State::Running(running) => Ok(&running.dispatcher),
            _ => Err(self.invalid_state(operation)),
        }
    }

    fn invalid_state(&self, operation: &'static str) -> Error {
        Error::InvalidState {
            operation,
            state: self.state().as_str(),
        }
    }
}
