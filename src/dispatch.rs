//! Command dispatch
//!
//! [`VpnDispatcher`] decodes a request, runs the matching session operation
//! and encodes the outcome. Nothing that arrives on the socket can make it
//! fail: undecodable requests are answered with `CommandNotUnderstood` and
//! session faults with `Failed`.

use crate::ipc::{MessageProcessor, Response};
use crate::protocol::codec;
use crate::protocol::{Command, Reply, Request, ReturnCode};
use crate::vpn::SessionController;
use tracing::{debug, error, info, warn};

pub struct VpnDispatcher {
    controller: SessionController,
}

impl VpnDispatcher {
    pub fn new(controller: SessionController) -> Self {
        Self { controller }
    }

    pub fn controller(&self) -> &SessionController {
        &self.controller
    }

    pub async fn dispatch(&mut self, request: Request) -> ReturnCode {
        info!("Handling {:?} request", request.command);
        match (request.command, request.login_code) {
            (Command::Status, _) => self.controller.check_status(),
            (Command::Open, Some(login_code)) => {
                match self.controller.connect(&login_code).await {
                    Ok(code) => code,
                    Err(e) => {
                        error!("Connect failed: {}", e);
                        ReturnCode::Failed
                    }
                }
            }
            (Command::Open, None) => {
                warn!("Open request without login code");
                ReturnCode::CommandNotUnderstood
            }
            (Command::Close, _) => match self.controller.disconnect().await {
                Ok(code) => code,
                Err(e) => {
                    error!("Disconnect failed: {}", e);
                    ReturnCode::Failed
                }
            },
            (Command::Quit, _) => self.controller.quit(),
        }
    }
}

impl MessageProcessor for VpnDispatcher {
    async fn process(&mut self, message: &str) -> Response {
        let code = match codec::decode_request(message) {
            Ok(request) => self.dispatch(request).await,
            Err(e) => {
                warn!("Rejecting request: {}", e);
                ReturnCode::CommandNotUnderstood
            }
        };
        respond(code)
    }

    fn malformed(&mut self) -> Response {
        respond(ReturnCode::CommandNotUnderstood)
    }
}

fn respond(code: ReturnCode) -> Response {
    debug!("Replying {:?}", code);

    let payload = codec::encode_reply(&Reply::new(code)).unwrap_or_else(|e| {
        error!("{}", e);
        String::new()
    });

    if code == ReturnCode::QuitApplication {
        Response::reply_then_shutdown(payload)
    } else {
        Response::reply(payload)
    }
}

/// Replies with the request text reversed; used to smoke-test the transport
pub struct ReverseProcessor;

impl MessageProcessor for ReverseProcessor {
    async fn process(&mut self, message: &str) -> Response {
        Response::reply(message.chars().rev().collect::<String>())
    }

    fn malformed(&mut self) -> Response {
        Response::reply("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::codec::{decode_reply, encode_request};
    use crate::testing::{LOGIN_CODE, Sandbox};
    use std::time::Duration;

    fn dispatcher(sandbox: &Sandbox) -> VpnDispatcher {
        VpnDispatcher::new(sandbox.mock_controller(Duration::from_secs(30)))
    }

    async fn send(dispatcher: &mut VpnDispatcher, request: Request) -> ReturnCode {
        let message = encode_request(&request).unwrap();
        let response = dispatcher.process(&message).await;
        decode_reply(&response.payload).unwrap().return_code
    }

    #[tokio::test]
    async fn test_reverse_processor() {
        let response = ReverseProcessor.process("hello").await;
        assert_eq!(response, Response::reply("olleh"));
    }

    #[tokio::test]
    async fn test_malformed_is_not_understood() {
        let sandbox = Sandbox::new();
        let mut dispatcher = dispatcher(&sandbox);

        let response = dispatcher.malformed();
        assert!(!response.shutdown);
        assert_eq!(
            decode_reply(&response.payload).unwrap().return_code,
            ReturnCode::CommandNotUnderstood
        );
    }

    #[tokio::test]
    async fn test_open_status_close_sequence() {
        let sandbox = Sandbox::new();
        let mut dispatcher = dispatcher(&sandbox);

        let codes = [
            send(&mut dispatcher, Request::new(Command::Status)).await,
            send(&mut dispatcher, Request::open(LOGIN_CODE)).await,
            send(&mut dispatcher, Request::new(Command::Status)).await,
            send(&mut dispatcher, Request::new(Command::Close)).await,
            send(&mut dispatcher, Request::new(Command::Status)).await,
        ];
        assert_eq!(
            codes,
            [
                ReturnCode::Inactive,
                ReturnCode::Success,
                ReturnCode::Active,
                ReturnCode::Success,
                ReturnCode::Inactive,
            ]
        );
    }

    #[tokio::test]
    async fn test_close_when_disconnected() {
        let sandbox = Sandbox::new();
        let mut dispatcher = dispatcher(&sandbox);

        assert_eq!(
            send(&mut dispatcher, Request::new(Command::Close)).await,
            ReturnCode::AlreadyDisconnected
        );
    }

    #[tokio::test]
    async fn test_quit_requests_shutdown() {
        let sandbox = Sandbox::new();
        let mut dispatcher = dispatcher(&sandbox);

        let response = dispatcher.process(r#"{"command":4}"#).await;
        assert!(response.shutdown);
        assert_eq!(
            decode_reply(&response.payload).unwrap().return_code,
            ReturnCode::QuitApplication
        );
        assert!(!dispatcher.controller().has_subprocess());
    }

    #[tokio::test]
    async fn test_only_quit_requests_shutdown() {
        let sandbox = Sandbox::new();
        let mut dispatcher = dispatcher(&sandbox);

        let response = dispatcher.process(r#"{"command":1}"#).await;
        assert!(!response.shutdown);
        let response = dispatcher.process("garbage").await;
        assert!(!response.shutdown);
    }

    #[tokio::test]
    async fn test_malformed_requests_are_not_understood() {
        let sandbox = Sandbox::new();
        let mut dispatcher = dispatcher(&sandbox);

        for message in ["", "5", "hello", r#"{"command":9}"#, r#"{"command":"Open"}"#] {
            let response = dispatcher.process(message).await;
            assert_eq!(
                decode_reply(&response.payload).unwrap().return_code,
                ReturnCode::CommandNotUnderstood,
                "message: {message:?}"
            );
        }
    }

    #[tokio::test]
    async fn test_open_without_login_code_is_not_understood() {
        let sandbox = Sandbox::new();
        let mut dispatcher = dispatcher(&sandbox);

        assert_eq!(
            send(&mut dispatcher, Request::new(Command::Open)).await,
            ReturnCode::CommandNotUnderstood
        );
        assert!(!dispatcher.controller().has_subprocess());
    }

    #[tokio::test]
    async fn test_spawn_failure_is_reported_as_failed() {
        let sandbox = Sandbox::new();
        let mut config = sandbox.vpn_config("", &[]);
        config.command = vec!["/nonexistent/gpclient".to_string()];
        let mut dispatcher = VpnDispatcher::new(SessionController::new(&config));

        assert_eq!(
            send(&mut dispatcher, Request::open(LOGIN_CODE)).await,
            ReturnCode::Failed
        );
    }
}
