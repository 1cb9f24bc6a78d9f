//! Runs packaged AWS Lambda functions behind a local emulator for integration tests.
//!
//! A [Session] unpacks the function archives, writes a SAM template for them and launches
//! the emulator (`sam local start-api` by default). Running functions can then be called
//! directly via the Lambda Invoke API or through the HTTP API front end.
//!
//! ```no_run
//! # async fn run() -> lambda_local_stack::Result<()> {
//! use lambda_local_stack::{FunctionDescription, Functions, Session, SessionOptions};
//!
//! let mut functions = Functions::new();
//! functions.insert(
//!     "greet".to_owned(),
//!     FunctionDescription::new("fn.zip", "index.handler", "nodejs18.x").with_route("/hello"),
//! );
//!
//! let mut session = Session::generate("./artifacts", &functions, SessionOptions::default())?;
//! let url = session.start().await?;
//! println!("HTTP API: {url}");
//!
//! let resp = session.send_api_gw_request("/hello", None).await?;
//! println!("{}", resp.status());
//!
//! let id = session.names().get("/greet").unwrap_or_default().to_owned();
//! let resp = session.send_request(&id, "/hello", None, None).await?;
//! println!("{}", resp.body);
//!
//! session.stop().await?;
//! # Ok(())
//! # }
//! ```

pub mod archive;
pub mod config;
pub mod dispatch;
pub mod emulator;
mod error;
pub mod names;
pub mod session;
pub mod template;
pub mod types;

pub use config::{EmulatorCommand, Endpoint, SessionOptions};
pub use dispatch::{Dispatcher, Headers, InvokeResponse, QueryParams};
pub use emulator::{EmulatorEvent, Observer};
pub use error::{Error, Result};
pub use names::NameMapping;
pub use session::{Session, SessionState};
pub use types::{FunctionDescription, Functions};
