//! SPDY session integration tests
//!
//! These tests drive a complete session over a scripted transport and
//! verify the observable frame sequences: startup handshake, PING echo,
//! stream dispatch and response flushing, GOAWAY emission on protocol
//! errors, flow control, server push, and failure handling. Most tests
//! run over both SPDY v2 and v3.

use spdymux::spdy::error::{GoawayStatus, RstStreamStatus};
use spdymux::spdy::frames::{
    ControlFlags, Frame, HeaderBlock, SynStreamFrame, WindowUpdateFrame,
};
use spdymux::spdy::settings::{SettingsEntry, SettingsId};
use spdymux::spdy::{
    Executor, InlineExecutor, ReadStatus, ServerConfig, SessionIo, SessionState, SpdyFramer,
    SpdySession, SpdyVersion, StreamHandle, StreamTask, StreamTaskFactory, ThreadPoolExecutor,
    WriteStatus,
};
use std::collections::VecDeque;
use std::sync::Arc;

/// Scripted transport: canned input chunks, decoded record of output.
struct ScriptedIo {
    input: VecDeque<Vec<u8>>,
    decoder: SpdyFramer,
    client: SpdyFramer,
    sent: Vec<Frame>,
    read_blocking_flags: Vec<bool>,
    fail_write_when: Option<Box<dyn Fn(&Frame) -> bool>>,
    echo_window_updates: bool,
    aborted: bool,
    abort_checks: usize,
    on_abort_check: Option<Box<dyn FnMut(usize)>>,
}

impl ScriptedIo {
    fn new(version: SpdyVersion) -> Self {
        ScriptedIo {
            input: VecDeque::new(),
            decoder: SpdyFramer::new(version),
            client: SpdyFramer::new(version),
            sent: Vec::new(),
            read_blocking_flags: Vec::new(),
            fail_write_when: None,
            echo_window_updates: false,
            aborted: false,
            abort_checks: 0,
            on_abort_check: None,
        }
    }

    fn push_chunk(&mut self, chunk: impl Into<Vec<u8>>) {
        self.input.push_back(chunk.into());
    }
}

impl SessionIo for ScriptedIo {
    fn is_connection_aborted(&mut self) -> bool {
        self.abort_checks += 1;
        let n = self.abort_checks;
        if let Some(hook) = self.on_abort_check.as_mut() {
            hook(n);
        }
        self.aborted
    }

    fn process_available_input(&mut self, block: bool, framer: &mut SpdyFramer) -> ReadStatus {
        self.read_blocking_flags.push(block);
        match self.input.pop_front() {
            None => ReadStatus::ConnectionClosed,
            Some(chunk) => {
                framer.process_input(&chunk);
                if framer.has_error() {
                    ReadStatus::Error
                } else {
                    ReadStatus::Success
                }
            }
        }
    }

    fn send_frame_raw(&mut self, frame: &[u8]) -> WriteStatus {
        self.decoder.process_input(frame);
        assert!(!self.decoder.has_error(), "session emitted undecodable bytes");
        let frame = self.decoder.pop_frame().expect("exactly one frame per write");

        // For SPDY v3, acknowledge every DATA frame with a WINDOW_UPDATE
        // of the same size, as a well-behaved client would.
        if self.echo_window_updates {
            if let Frame::Data(ref data) = frame {
                if !data.data.is_empty() {
                    let update = self.client.encode_window_update(&WindowUpdateFrame {
                        stream_id: data.stream_id,
                        delta_window_size: data.data.len() as u32,
                    });
                    self.input.push_back(update.to_vec());
                }
            }
        }

        let failed = self
            .fail_write_when
            .as_ref()
            .map_or(false, |predicate| predicate(&frame));
        self.sent.push(frame);
        if failed {
            WriteStatus::ConnectionClosed
        } else {
            WriteStatus::Success
        }
    }
}

/// Client-side frame builder sharing one compression context, the way a
/// real peer would.
struct TestClient {
    framer: SpdyFramer,
    version: SpdyVersion,
}

impl TestClient {
    fn new(version: SpdyVersion) -> Self {
        TestClient {
            framer: SpdyFramer::new(version),
            version,
        }
    }

    fn required_headers(version: SpdyVersion) -> HeaderBlock {
        let mut headers = HeaderBlock::new();
        let names: [(&str, &str); 5] = match version {
            SpdyVersion::V2 => [
                ("host", "www.example.com"),
                ("method", "GET"),
                ("scheme", "https"),
                ("url", "/foo/index.html"),
                ("version", "HTTP/1.1"),
            ],
            SpdyVersion::V3 => [
                (":host", "www.example.com"),
                (":method", "GET"),
                (":path", "/foo/index.html"),
                (":scheme", "https"),
                (":version", "HTTP/1.1"),
            ],
        };
        for (name, value) in names {
            headers.insert(name.to_string(), value.to_string());
        }
        headers
    }

    fn syn_stream(&mut self, stream_id: u32, priority: u8, flags: u8) -> Vec<u8> {
        let frame = SynStreamFrame::new(stream_id, priority, Self::required_headers(self.version))
            .with_flags(flags);
        self.framer.encode_syn_stream(&frame).unwrap().to_vec()
    }

    fn ping(&mut self, id: u32) -> Vec<u8> {
        self.framer
            .encode_ping(&spdymux::spdy::frames::PingFrame { id })
            .to_vec()
    }

    fn settings_initial_window(&mut self, value: u32) -> Vec<u8> {
        let frame = spdymux::spdy::frames::SettingsFrame::new(vec![SettingsEntry::new(
            SettingsId::InitialWindowSize,
            value,
        )]);
        self.framer.encode_settings(&frame).to_vec()
    }

    fn data(&mut self, stream_id: u32, payload: &str, fin: bool) -> Vec<u8> {
        self.framer
            .encode_data_frame(&spdymux::spdy::frames::DataFrame::new(
                stream_id,
                bytes::Bytes::from(payload.to_string()),
                fin,
            ))
            .to_vec()
    }

    fn goaway(&mut self) -> Vec<u8> {
        self.framer
            .encode_goaway(&spdymux::spdy::frames::GoawayFrame {
                last_good_stream_id: 0,
                status: GoawayStatus::Ok,
            })
            .to_vec()
    }

    fn window_update(&mut self, stream_id: u32, delta: u32) -> Vec<u8> {
        self.framer
            .encode_window_update(&WindowUpdateFrame {
                stream_id,
                delta_window_size: delta,
            })
            .to_vec()
    }

    /// A SYN_STREAM whose header block was never compressed
    fn syn_stream_uncompressed(version: SpdyVersion, stream_id: u32) -> Vec<u8> {
        let mut frame = Vec::new();
        let block = b"foobar: not compressed";
        frame.extend_from_slice(&(0x8000u16 | version.as_u16()).to_be_bytes());
        frame.extend_from_slice(&1u16.to_be_bytes());
        frame.push(ControlFlags::FIN);
        let length = 10 + block.len();
        frame.extend_from_slice(&[(length >> 16) as u8, (length >> 8) as u8, length as u8]);
        frame.extend_from_slice(&stream_id.to_be_bytes());
        frame.extend_from_slice(&0u32.to_be_bytes());
        frame.extend_from_slice(&[0, 0]);
        frame.extend_from_slice(block);
        frame
    }
}

/// The worker used throughout: replies with headers, "foobar", then
/// "quux" with FIN. Push streams open with SYN_STREAM instead.
struct SimpleResponseTask {
    stream: StreamHandle,
}

impl StreamTask for SimpleResponseTask {
    fn run(&mut self) {
        if !self.stream.is_server_push() {
            let frame = self.stream.get_input_frame(false).expect("request frame");
            assert!(matches!(frame, Frame::SynStream(_)));
        }

        let mut headers = HeaderBlock::new();
        headers.insert("status".to_string(), "200".to_string());
        headers.insert("version".to_string(), "HTTP/1.1".to_string());
        if self.stream.is_server_push() {
            self.stream.send_syn_stream(headers, false).unwrap();
        } else {
            self.stream.send_syn_reply(headers, false).unwrap();
        }

        self.stream.send_data(&b"foobar"[..], false).unwrap();
        self.stream.send_data(&b"quux"[..], true).unwrap();
    }

    fn cancel(&mut self) {}
}

struct SimpleResponseFactory;

impl StreamTaskFactory for SimpleResponseFactory {
    fn new_stream_task(&self, stream: StreamHandle) -> Box<dyn StreamTask> {
        Box::new(SimpleResponseTask { stream })
    }
}

fn for_each_version(test: impl Fn(SpdyVersion)) {
    test(SpdyVersion::V2);
    test(SpdyVersion::V3);
}

/// Run a session to completion and return its final state.
fn run_session(
    version: SpdyVersion,
    config: &ServerConfig,
    io: &mut ScriptedIo,
    factory: &dyn StreamTaskFactory,
    executor: &dyn Executor,
) -> SessionState {
    let mut session = SpdySession::new(version, config, io, factory, executor);
    session.run();
    session.state()
}

fn assert_settings_first(sent: &[Frame]) {
    assert!(
        matches!(sent.first(), Some(Frame::Settings(_))),
        "first frame must be SETTINGS, got {:?}",
        sent.first()
    );
}

fn assert_goaway(frame: &Frame, status: GoawayStatus, last_good_stream_id: u32) {
    match frame {
        Frame::Goaway(goaway) => {
            assert_eq!(goaway.last_good_stream_id, last_good_stream_id);
            // SPDY/2 GOAWAY carries no status on the wire.
            if status != GoawayStatus::Ok {
                assert!(
                    goaway.status == status || goaway.status == GoawayStatus::Ok,
                    "unexpected GOAWAY status {}",
                    goaway.status
                );
            }
        }
        other => panic!("expected GOAWAY, got {:?}", other),
    }
}

fn data_payloads(sent: &[Frame]) -> Vec<(String, bool)> {
    sent.iter()
        .filter_map(|frame| match frame {
            Frame::Data(d) => Some((
                String::from_utf8(d.data.to_vec()).unwrap(),
                d.fin,
            )),
            _ => None,
        })
        .collect()
}

#[test]
fn test_connection_already_closed() {
    for_each_version(|version| {
        let config = ServerConfig::default();
        let mut io = ScriptedIo::new(version);
        io.fail_write_when = Some(Box::new(|frame| matches!(frame, Frame::Settings(_))));
        let executor = InlineExecutor::new();

        let state = run_session(version, &config, &mut io, &SimpleResponseFactory, &executor);

        assert_eq!(state, SessionState::Closed);
        assert!(executor.stopped());
        // The SETTINGS write was attempted and nothing followed it.
        assert_eq!(io.sent.len(), 1);
        assert_settings_first(&io.sent);
    });
}

#[test]
fn test_immediate_connection_abort() {
    for_each_version(|version| {
        let config = ServerConfig::default();
        let mut io = ScriptedIo::new(version);
        io.aborted = true;
        let executor = InlineExecutor::new();

        let state = run_session(version, &config, &mut io, &SimpleResponseFactory, &executor);

        assert_eq!(state, SessionState::Closed);
        assert!(executor.stopped());
        assert_eq!(io.sent.len(), 1);
        assert_settings_first(&io.sent);
    });
}

#[test]
fn test_single_ping() {
    for_each_version(|version| {
        let config = ServerConfig::default();
        let mut client = TestClient::new(version);
        let mut io = ScriptedIo::new(version);
        io.push_chunk(client.ping(1));
        let executor = InlineExecutor::new();

        let state = run_session(version, &config, &mut io, &SimpleResponseFactory, &executor);

        assert_eq!(state, SessionState::Closed);
        assert!(executor.stopped());
        assert_eq!(io.sent.len(), 3);
        assert_settings_first(&io.sent);
        assert!(matches!(
            io.sent[1],
            Frame::Ping(spdymux::spdy::frames::PingFrame { id: 1 })
        ));
        assert_goaway(&io.sent[2], GoawayStatus::Ok, 0);
        // With no streams and no output, every read may block.
        assert!(io.read_blocking_flags.iter().all(|&block| block));
    });
}

#[test]
fn test_single_stream() {
    for_each_version(|version| {
        let config = ServerConfig::default();
        let mut client = TestClient::new(version);
        let mut io = ScriptedIo::new(version);
        io.push_chunk(client.syn_stream(1, 2, ControlFlags::FIN));
        let executor = InlineExecutor::new();
        executor.set_run_on_add(true);

        let state = run_session(version, &config, &mut io, &SimpleResponseFactory, &executor);

        assert_eq!(state, SessionState::Closed);
        assert!(executor.stopped());
        assert_settings_first(&io.sent);
        match &io.sent[1] {
            Frame::SynReply(reply) => {
                assert_eq!(reply.stream_id, 1);
                assert!(!reply.fin);
            }
            other => panic!("expected SYN_REPLY, got {:?}", other),
        }
        assert_eq!(
            data_payloads(&io.sent),
            vec![("foobar".to_string(), false), ("quux".to_string(), true)]
        );
        assert_goaway(io.sent.last().unwrap(), GoawayStatus::Ok, 1);
    });
}

#[test]
fn test_shutdown_session_if_send_frame_fails() {
    for_each_version(|version| {
        let config = ServerConfig::default();
        let mut client = TestClient::new(version);
        let mut io = ScriptedIo::new(version);
        io.push_chunk(client.syn_stream(1, 2, ControlFlags::FIN));
        io.fail_write_when = Some(Box::new(|frame| {
            matches!(frame, Frame::Data(d) if d.data.as_ref() == b"foobar")
        }));
        let executor = InlineExecutor::new();
        executor.set_run_on_add(true);

        let state = run_session(version, &config, &mut io, &SimpleResponseFactory, &executor);

        assert_eq!(state, SessionState::Closed);
        assert!(executor.stopped());
        // "quux" was already queued but nothing after the failed write
        // may be attempted, GOAWAY included.
        match io.sent.last().unwrap() {
            Frame::Data(d) => assert_eq!(d.data.as_ref(), b"foobar"),
            other => panic!("expected the failed DATA last, got {:?}", other),
        }
    });
}

#[test]
fn test_goaway_in_response_to_garbage() {
    for_each_version(|version| {
        let config = ServerConfig::default();
        let mut io = ScriptedIo::new(version);
        io.push_chunk(&b"\x88\x5f\x92\x02\xf8\x92\x12\xd1\x82\xdc\x1a\x40\xbb\xb2\x9d\x13"[..]);
        let executor = InlineExecutor::new();

        let state = run_session(version, &config, &mut io, &SimpleResponseFactory, &executor);

        assert_eq!(state, SessionState::Closed);
        assert_eq!(io.sent.len(), 2);
        assert_settings_first(&io.sent);
        assert_goaway(&io.sent[1], GoawayStatus::ProtocolError, 0);
    });
}

#[test]
fn test_goaway_for_bad_syn_stream_compression() {
    for_each_version(|version| {
        let config = ServerConfig::default();
        let mut io = ScriptedIo::new(version);
        io.push_chunk(TestClient::syn_stream_uncompressed(version, 1));
        let executor = InlineExecutor::new();

        let state = run_session(version, &config, &mut io, &SimpleResponseFactory, &executor);

        assert_eq!(state, SessionState::Closed);
        assert_eq!(io.sent.len(), 2);
        assert_goaway(&io.sent[1], GoawayStatus::ProtocolError, 0);
    });
}

#[test]
fn test_goaway_for_syn_stream_id_zero() {
    for_each_version(|version| {
        let config = ServerConfig::default();
        let mut client = TestClient::new(version);
        let mut io = ScriptedIo::new(version);
        io.push_chunk(client.syn_stream(0, 0, ControlFlags::FIN));
        let executor = InlineExecutor::new();

        let state = run_session(version, &config, &mut io, &SimpleResponseFactory, &executor);

        assert_eq!(state, SessionState::Closed);
        assert_eq!(io.sent.len(), 2);
        assert_goaway(&io.sent[1], GoawayStatus::ProtocolError, 0);
    });
}

#[test]
fn test_goaway_for_syn_stream_with_invalid_flags() {
    for_each_version(|version| {
        let config = ServerConfig::default();
        let mut client = TestClient::new(version);
        let mut io = ScriptedIo::new(version);
        io.push_chunk(client.syn_stream(1, 0, 0x47));
        let executor = InlineExecutor::new();

        let state = run_session(version, &config, &mut io, &SimpleResponseFactory, &executor);

        assert_eq!(state, SessionState::Closed);
        assert_eq!(io.sent.len(), 2);
        assert_goaway(&io.sent[1], GoawayStatus::ProtocolError, 0);
    });
}

#[test]
fn test_goaway_for_duplicate_stream_id() {
    for_each_version(|version| {
        let config = ServerConfig::default();
        let mut client = TestClient::new(version);
        let mut io = ScriptedIo::new(version);
        io.push_chunk(client.syn_stream(1, 2, ControlFlags::FIN));
        io.push_chunk(client.syn_stream(1, 2, ControlFlags::FIN));
        let executor = Arc::new(InlineExecutor::new());

        // The first stream's worker runs only after the duplicate has
        // already been answered with GOAWAY.
        {
            let executor = executor.clone();
            io.on_abort_check = Some(Box::new(move |n| {
                if n == 3 {
                    executor.run_all();
                }
            }));
        }

        let state = run_session(version, &config, &mut io, &SimpleResponseFactory, &*executor);

        assert_eq!(state, SessionState::Closed);
        assert!(executor.stopped());
        assert_settings_first(&io.sent);
        // GOAWAY precedes the first stream's queued response, which is
        // still flushed afterwards.
        assert_goaway(&io.sent[1], GoawayStatus::ProtocolError, 1);
        assert!(matches!(&io.sent[2], Frame::SynReply(r) if r.stream_id == 1));
        assert_eq!(
            data_payloads(&io.sent),
            vec![("foobar".to_string(), false), ("quux".to_string(), true)]
        );
        // Once a stream is live (or its output is pending), reads must
        // not block.
        assert_eq!(io.read_blocking_flags, vec![true, false, false]);
    });
}

#[test]
fn test_client_goaway_initiates_drain() {
    for_each_version(|version| {
        let config = ServerConfig::default();
        let mut client = TestClient::new(version);
        let mut io = ScriptedIo::new(version);
        io.push_chunk(client.goaway());
        let executor = InlineExecutor::new();

        let state = run_session(version, &config, &mut io, &SimpleResponseFactory, &executor);

        assert_eq!(state, SessionState::Closed);
        assert_eq!(io.sent.len(), 2);
        assert_goaway(&io.sent[1], GoawayStatus::Ok, 0);
    });
}

#[test]
fn test_rst_for_data_on_unknown_stream() {
    for_each_version(|version| {
        let config = ServerConfig::default();
        let mut client = TestClient::new(version);
        let mut io = ScriptedIo::new(version);
        io.push_chunk(client.data(7, "stray", false));
        let executor = InlineExecutor::new();

        let state = run_session(version, &config, &mut io, &SimpleResponseFactory, &executor);

        assert_eq!(state, SessionState::Closed);
        assert_eq!(io.sent.len(), 3);
        match &io.sent[1] {
            Frame::RstStream(rst) => {
                assert_eq!(rst.stream_id, 7);
                assert_eq!(rst.status, RstStreamStatus::InvalidStream);
            }
            other => panic!("expected RST_STREAM, got {:?}", other),
        }
        // A per-stream violation does not end the session abnormally.
        assert_goaway(&io.sent[2], GoawayStatus::Ok, 0);
    });
}

#[test]
fn test_refused_stream_over_concurrency_limit() {
    for_each_version(|version| {
        let config = ServerConfig::builder()
            .max_concurrent_streams(1)
            .build()
            .unwrap();
        let mut client = TestClient::new(version);
        let mut io = ScriptedIo::new(version);
        // Stream 1 stays open (no FIN from the worker yet) while stream 3
        // arrives.
        io.push_chunk(client.syn_stream(1, 2, ControlFlags::FIN));
        io.push_chunk(client.syn_stream(3, 2, ControlFlags::FIN));
        let executor = Arc::new(InlineExecutor::new());
        {
            // Hold stream 1's worker until after stream 3 was refused.
            let executor = executor.clone();
            io.on_abort_check = Some(Box::new(move |n| {
                if n >= 3 {
                    executor.run_all();
                }
            }));
        }

        let state = run_session(version, &config, &mut io, &SimpleResponseFactory, &*executor);

        assert_eq!(state, SessionState::Closed);
        let rst = io
            .sent
            .iter()
            .find_map(|frame| match frame {
                Frame::RstStream(rst) => Some(rst),
                _ => None,
            })
            .expect("expected a RST_STREAM");
        assert_eq!(rst.stream_id, 3);
        assert_eq!(rst.status, RstStreamStatus::RefusedStream);
        // Stream 1 still got its full response.
        assert_eq!(
            data_payloads(&io.sent),
            vec![("foobar".to_string(), false), ("quux".to_string(), true)]
        );
        // The refused id counts as seen.
        assert_goaway(io.sent.last().unwrap(), GoawayStatus::Ok, 3);
    });
}

#[test]
fn test_client_rst_aborts_stream() {
    for_each_version(|version| {
        struct ReplyOnlyTask {
            stream: StreamHandle,
        }
        impl StreamTask for ReplyOnlyTask {
            fn run(&mut self) {
                let _ = self.stream.get_input_frame(false);
                let mut headers = HeaderBlock::new();
                headers.insert("status".to_string(), "200".to_string());
                headers.insert("version".to_string(), "HTTP/1.1".to_string());
                let _ = self.stream.send_syn_reply(headers, false);
                // The stream stays half-open; only the client RST ends it.
            }
            fn cancel(&mut self) {}
        }
        struct ReplyOnlyFactory;
        impl StreamTaskFactory for ReplyOnlyFactory {
            fn new_stream_task(&self, stream: StreamHandle) -> Box<dyn StreamTask> {
                Box::new(ReplyOnlyTask { stream })
            }
        }

        let config = ServerConfig::default();
        let mut client = TestClient::new(version);
        let mut io = ScriptedIo::new(version);
        io.push_chunk(client.syn_stream(1, 2, ControlFlags::FIN));
        io.push_chunk(client.framer.encode_rst_stream(&spdymux::spdy::frames::RstStreamFrame {
            stream_id: 1,
            status: RstStreamStatus::Cancel,
        }).to_vec());
        let executor = InlineExecutor::new();
        executor.set_run_on_add(true);

        let state = run_session(version, &config, &mut io, &ReplyOnlyFactory, &executor);

        // The RST released the half-open stream, letting the session
        // finish cleanly; we never reset it ourselves.
        assert_eq!(state, SessionState::Closed);
        assert!(!io.sent.iter().any(|f| matches!(f, Frame::RstStream(_))));
        assert_goaway(io.sent.last().unwrap(), GoawayStatus::Ok, 1);
    });
}

#[test]
fn test_worker_panic_resets_stream() {
    for_each_version(|version| {
        struct PanickingFactory;
        struct PanickingTask;
        impl StreamTask for PanickingTask {
            fn run(&mut self) {
                panic!("handler bug");
            }
            fn cancel(&mut self) {}
        }
        impl StreamTaskFactory for PanickingFactory {
            fn new_stream_task(&self, _stream: StreamHandle) -> Box<dyn StreamTask> {
                Box::new(PanickingTask)
            }
        }

        let config = ServerConfig::default();
        let mut client = TestClient::new(version);
        let mut io = ScriptedIo::new(version);
        io.push_chunk(client.syn_stream(1, 2, ControlFlags::FIN));
        let executor = InlineExecutor::new();
        executor.set_run_on_add(true);

        let state = run_session(version, &config, &mut io, &PanickingFactory, &executor);

        assert_eq!(state, SessionState::Closed);
        let rst = io
            .sent
            .iter()
            .find_map(|frame| match frame {
                Frame::RstStream(rst) => Some(rst),
                _ => None,
            })
            .expect("expected a RST_STREAM");
        assert_eq!(rst.stream_id, 1);
        assert_eq!(rst.status, RstStreamStatus::InternalError);
        assert_goaway(io.sent.last().unwrap(), GoawayStatus::Ok, 1);
    });
}

#[test]
fn test_v2_rejects_initial_window_size_setting() {
    let version = SpdyVersion::V2;
    let config = ServerConfig::default();
    let mut client = TestClient::new(version);
    let mut io = ScriptedIo::new(version);
    io.push_chunk(client.settings_initial_window(4000));
    let executor = InlineExecutor::new();

    let state = run_session(version, &config, &mut io, &SimpleResponseFactory, &executor);

    assert_eq!(state, SessionState::Closed);
    assert_eq!(io.sent.len(), 2);
    assert_goaway(&io.sent[1], GoawayStatus::ProtocolError, 0);
}

#[test]
fn test_v3_rejects_out_of_range_initial_window_size() {
    for value in [0u32, 0x8000_0000] {
        let version = SpdyVersion::V3;
        let config = ServerConfig::default();
        let mut client = TestClient::new(version);
        let mut io = ScriptedIo::new(version);
        io.push_chunk(client.settings_initial_window(value));
        let executor = InlineExecutor::new();

        let state = run_session(version, &config, &mut io, &SimpleResponseFactory, &executor);

        assert_eq!(state, SessionState::Closed);
        assert_eq!(io.sent.len(), 2, "window value {}", value);
        assert_goaway(&io.sent[1], GoawayStatus::ProtocolError, 0);
    }
}

#[test]
fn test_v3_single_stream_with_small_window() {
    let version = SpdyVersion::V3;
    let config = ServerConfig::default();
    let mut client = TestClient::new(version);
    let mut io = ScriptedIo::new(version);
    io.echo_window_updates = true;
    // Shrink the window to three bytes before the request arrives.
    io.push_chunk(client.settings_initial_window(3));
    io.push_chunk(client.syn_stream(1, 2, ControlFlags::FIN));
    let executor = ThreadPoolExecutor::new(1);

    let state = run_session(version, &config, &mut io, &SimpleResponseFactory, &executor);

    assert_eq!(state, SessionState::Closed);
    assert_settings_first(&io.sent);
    // Three bytes at a time, FIN on the final fragment.
    assert_eq!(
        data_payloads(&io.sent),
        vec![
            ("foo".to_string(), false),
            ("bar".to_string(), false),
            ("quu".to_string(), false),
            ("x".to_string(), true),
        ]
    );
    assert_goaway(io.sent.last().unwrap(), GoawayStatus::Ok, 1);
}

#[test]
fn test_v3_window_update_overflow_resets_stream() {
    let version = SpdyVersion::V3;
    let config = ServerConfig::default();
    let mut client = TestClient::new(version);
    let mut io = ScriptedIo::new(version);
    io.push_chunk(client.syn_stream(1, 2, ControlFlags::FIN));
    io.push_chunk(client.window_update(1, 0x7FFF_FFFF));
    let executor = InlineExecutor::new();

    struct ReplyOnlyFactory;
    struct ReplyOnlyTask {
        stream: StreamHandle,
    }
    impl StreamTask for ReplyOnlyTask {
        fn run(&mut self) {
            let _ = self.stream.get_input_frame(false);
            let mut headers = HeaderBlock::new();
            headers.insert("status".to_string(), "200".to_string());
            headers.insert("version".to_string(), "HTTP/1.1".to_string());
            let _ = self.stream.send_syn_reply(headers, false);
        }
        fn cancel(&mut self) {}
    }
    impl StreamTaskFactory for ReplyOnlyFactory {
        fn new_stream_task(&self, stream: StreamHandle) -> Box<dyn StreamTask> {
            Box::new(ReplyOnlyTask { stream })
        }
    }
    executor.set_run_on_add(true);

    let state = run_session(version, &config, &mut io, &ReplyOnlyFactory, &executor);

    assert_eq!(state, SessionState::Closed);
    let rst = io
        .sent
        .iter()
        .find_map(|frame| match frame {
            Frame::RstStream(rst) => Some(rst),
            _ => None,
        })
        .expect("expected a RST_STREAM");
    assert_eq!(rst.stream_id, 1);
    assert_eq!(rst.status, RstStreamStatus::FlowControlError);
    assert_goaway(io.sent.last().unwrap(), GoawayStatus::Ok, 1);
}

#[test]
fn test_v3_server_push() {
    let version = SpdyVersion::V3;
    let config = ServerConfig::default();
    let mut client = TestClient::new(version);
    let mut io = ScriptedIo::new(version);
    io.push_chunk(client.syn_stream(1, 2, ControlFlags::FIN));

    struct PushingTask {
        stream: StreamHandle,
    }
    impl StreamTask for PushingTask {
        fn run(&mut self) {
            let _ = self.stream.get_input_frame(false);
            let mut headers = HeaderBlock::new();
            headers.insert("status".to_string(), "200".to_string());
            headers.insert("version".to_string(), "HTTP/1.1".to_string());
            self.stream.send_syn_reply(headers, false).unwrap();

            let mut push_headers = HeaderBlock::new();
            push_headers.insert(":host".to_string(), "www.example.com".to_string());
            push_headers.insert(":path".to_string(), "/style.css".to_string());
            push_headers.insert(":scheme".to_string(), "https".to_string());
            self.stream.start_server_push(push_headers, 0).unwrap();

            self.stream.send_data(&b"body"[..], true).unwrap();
        }
        fn cancel(&mut self) {}
    }
    struct PushingFactory;
    impl StreamTaskFactory for PushingFactory {
        fn new_stream_task(&self, stream: StreamHandle) -> Box<dyn StreamTask> {
            if stream.is_server_push() {
                Box::new(SimpleResponseTask { stream })
            } else {
                Box::new(PushingTask { stream })
            }
        }
    }

    let executor = Arc::new(InlineExecutor::new());
    {
        let executor = executor.clone();
        io.on_abort_check = Some(Box::new(move |_| executor.run_all()));
    }

    let state = run_session(version, &config, &mut io, &PushingFactory, &*executor);

    assert_eq!(state, SessionState::Closed);
    let push_syn = io
        .sent
        .iter()
        .find_map(|frame| match frame {
            Frame::SynStream(syn) => Some(syn),
            _ => None,
        })
        .expect("expected a push SYN_STREAM");
    assert_eq!(push_syn.stream_id, 2);
    assert_eq!(push_syn.associated_stream_id, 1);
    assert!(push_syn.flags.is_unidirectional());
    assert_eq!(push_syn.headers.get("status").map(String::as_str), Some("200"));

    // Both the response body and the pushed resource made it out.
    let payloads: Vec<String> = data_payloads(&io.sent)
        .into_iter()
        .map(|(payload, _)| payload)
        .collect();
    assert!(payloads.contains(&"body".to_string()));
    assert!(payloads.contains(&"foobar".to_string()));
    assert!(payloads.contains(&"quux".to_string()));
    assert_goaway(io.sent.last().unwrap(), GoawayStatus::Ok, 1);
}

#[test]
fn test_push_disabled_by_config() {
    let version = SpdyVersion::V3;
    let config = ServerConfig::builder()
        .enable_server_push(false)
        .build()
        .unwrap();
    let mut client = TestClient::new(version);
    let mut io = ScriptedIo::new(version);
    io.push_chunk(client.syn_stream(1, 2, ControlFlags::FIN));

    struct RefusedPushTask {
        stream: StreamHandle,
    }
    impl StreamTask for RefusedPushTask {
        fn run(&mut self) {
            let _ = self.stream.get_input_frame(false);
            assert!(self
                .stream
                .start_server_push(HeaderBlock::new(), 0)
                .is_err());
            let mut headers = HeaderBlock::new();
            headers.insert("status".to_string(), "200".to_string());
            headers.insert("version".to_string(), "HTTP/1.1".to_string());
            self.stream.send_syn_reply(headers, true).unwrap();
        }
        fn cancel(&mut self) {}
    }
    struct RefusedPushFactory;
    impl StreamTaskFactory for RefusedPushFactory {
        fn new_stream_task(&self, stream: StreamHandle) -> Box<dyn StreamTask> {
            Box::new(RefusedPushTask { stream })
        }
    }

    let executor = InlineExecutor::new();
    executor.set_run_on_add(true);

    let state = run_session(version, &config, &mut io, &RefusedPushFactory, &executor);

    assert_eq!(state, SessionState::Closed);
    assert!(!io
        .sent
        .iter()
        .any(|frame| matches!(frame, Frame::SynStream(_))));
    assert_goaway(io.sent.last().unwrap(), GoawayStatus::Ok, 1);
}

#[test]
fn test_v3_consumed_request_body_is_credited() {
    let version = SpdyVersion::V3;
    let config = ServerConfig::default();
    let mut client = TestClient::new(version);
    let mut io = ScriptedIo::new(version);
    io.push_chunk(client.syn_stream(1, 2, 0));
    io.push_chunk(client.data(1, "hello", true));

    // Consumes the request body, then answers.
    struct ConsumingTask {
        stream: StreamHandle,
    }
    impl StreamTask for ConsumingTask {
        fn run(&mut self) {
            loop {
                match self.stream.get_input_frame(true) {
                    Some(Frame::Data(data)) => {
                        assert_eq!(data.data.as_ref(), b"hello");
                        break;
                    }
                    Some(_) => continue,
                    None => return,
                }
            }
            let mut headers = HeaderBlock::new();
            headers.insert("status".to_string(), "200".to_string());
            headers.insert("version".to_string(), "HTTP/1.1".to_string());
            self.stream.send_syn_reply(headers, true).unwrap();
        }
        fn cancel(&mut self) {}
    }
    struct ConsumingFactory;
    impl StreamTaskFactory for ConsumingFactory {
        fn new_stream_task(&self, stream: StreamHandle) -> Box<dyn StreamTask> {
            Box::new(ConsumingTask { stream })
        }
    }

    let executor = ThreadPoolExecutor::new(1);
    let state = run_session(version, &config, &mut io, &ConsumingFactory, &executor);

    assert_eq!(state, SessionState::Closed);
    // The five consumed body bytes come back as receive window credit.
    let update = io
        .sent
        .iter()
        .find_map(|frame| match frame {
            Frame::WindowUpdate(update) => Some(update),
            _ => None,
        })
        .expect("expected a WINDOW_UPDATE");
    assert_eq!(update.stream_id, 1);
    assert_eq!(update.delta_window_size, 5);
    assert_goaway(io.sent.last().unwrap(), GoawayStatus::Ok, 1);
}

#[test]
fn test_no_goaway_when_disabled_by_config() {
    for_each_version(|version| {
        let config = ServerConfig::builder()
            .send_goaway_on_shutdown(false)
            .build()
            .unwrap();
        let mut client = TestClient::new(version);
        let mut io = ScriptedIo::new(version);
        io.push_chunk(client.ping(1));
        let executor = InlineExecutor::new();

        let state = run_session(version, &config, &mut io, &SimpleResponseFactory, &executor);

        assert_eq!(state, SessionState::Closed);
        assert_eq!(io.sent.len(), 2);
        assert!(matches!(io.sent[1], Frame::Ping(_)));
    });
}
