//! Remote headless-browser control: session lifecycle over a control-plane
//! HTTP API, CDP attachment over an authenticated WebSocket, and the
//! LLM-facing page-capture tool.

pub mod cdp;
pub mod control;
pub mod session;
#[cfg(test)]
pub(crate) mod testutil;
pub mod tool;

pub use cdp::CdpClient;
pub use control::{ConnectionInfo, ControlPlane, HttpControlPlane, SessionGrant};
pub use session::{RemoteBrowserSession, SessionState};
pub use tool::CapturePageTool;
