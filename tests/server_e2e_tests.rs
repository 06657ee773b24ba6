//! End-to-end tests over a real listener: raw TCP in, engine dispatch,
//! raw HTTP back out.

use caribe::app::{HttpServlet, ServletDef, WebApp};
use caribe::app::ServletError;
use caribe::host::AppHost;
use caribe::http::{HttpRequest, HttpResponse};
use caribe::server::{GatewayService, HttpServer};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::{Arc, Once};
use std::time::Duration;

static MAY_INIT: Once = Once::new();

fn setup_may_runtime() {
    MAY_INIT.call_once(|| {
        may::config().set_stack_size(0x8000);
    });
}

struct HelloServlet;

impl HttpServlet for HelloServlet {
    fn service(
        &self,
        req: &mut HttpRequest,
        res: &mut HttpResponse,
    ) -> Result<(), ServletError> {
        res.set_header("Content-Type", "text/plain");
        let who = req.query_param("who").unwrap_or("world");
        res.write(format!("hello {who}").as_bytes());
        Ok(())
    }
}

fn hosted_hello(context: &str) -> Arc<WebApp> {
    let app = Arc::new(WebApp::new(context).unwrap());
    app.add_servlet(ServletDef::of_instance("hello", Arc::new(HelloServlet)))
        .unwrap();
    app.add_servlet_mapping("/hello", "hello").unwrap();
    caribe::lifecycle::start(&app).unwrap();
    app
}

fn start_server(host: Arc<AppHost>) -> (caribe::server::ServerHandle, SocketAddr) {
    setup_may_runtime();
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let handle = HttpServer(GatewayService::new(host)).start(addr).unwrap();
    handle.wait_ready().unwrap();
    (handle, addr)
}

fn send_request(addr: &SocketAddr, req: &str) -> String {
    let mut stream = TcpStream::connect(addr).unwrap();
    stream.write_all(req.as_bytes()).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_millis(200)))
        .unwrap();
    let mut buf = Vec::new();
    loop {
        let mut tmp = [0u8; 1024];
        match stream.read(&mut tmp) {
            Ok(0) => break,
            Ok(n) => buf.extend_from_slice(&tmp[..n]),
            Err(ref e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                break
            }
            Err(e) => panic!("read error: {e:?}"),
        }
    }
    String::from_utf8_lossy(&buf).to_string()
}

fn status_of(resp: &str) -> u16 {
    resp.lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|s| s.parse().ok())
        .unwrap_or(0)
}

fn body_of(resp: &str) -> String {
    resp.split("\r\n\r\n").nth(1).unwrap_or("").to_string()
}

fn header_of(resp: &str, name: &str) -> Option<String> {
    resp.split("\r\n\r\n")
        .next()
        .unwrap_or("")
        .lines()
        .skip(1)
        .find_map(|line| {
            let (k, v) = line.split_once(':')?;
            if k.trim().eq_ignore_ascii_case(name) {
                Some(v.trim().to_string())
            } else {
                None
            }
        })
}

#[test]
fn serves_a_servlet_over_real_http() {
    let host = Arc::new(AppHost::new());
    host.add("shop", hosted_hello("/shop")).unwrap();
    let (handle, addr) = start_server(Arc::clone(&host));

    let resp = send_request(
        &addr,
        "GET /shop/hello?who=caribe HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n",
    );
    assert_eq!(status_of(&resp), 200);
    assert_eq!(body_of(&resp), "hello caribe");

    handle.stop();
    host.stop_all();
}

#[test]
fn unmatched_path_inside_the_app_is_404() {
    let host = Arc::new(AppHost::new());
    host.add("shop", hosted_hello("/shop")).unwrap();
    let (handle, addr) = start_server(Arc::clone(&host));

    let resp = send_request(
        &addr,
        "GET /shop/nope HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n",
    );
    assert_eq!(status_of(&resp), 404);

    handle.stop();
    host.stop_all();
}

#[test]
fn path_outside_every_context_is_404_at_the_gateway() {
    let host = Arc::new(AppHost::new());
    host.add("shop", hosted_hello("/shop")).unwrap();
    let (handle, addr) = start_server(Arc::clone(&host));

    let resp = send_request(
        &addr,
        "GET /elsewhere HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n",
    );
    assert_eq!(status_of(&resp), 404);
    assert_eq!(body_of(&resp), "Not Found");

    handle.stop();
    host.stop_all();
}

#[test]
fn forwarded_request_id_is_echoed_on_the_response() {
    let host = Arc::new(AppHost::new());
    host.add("shop", hosted_hello("/shop")).unwrap();
    let (handle, addr) = start_server(Arc::clone(&host));

    let id = "01ARZ3NDEKTSV4RRFFQ69G5FAV";
    let resp = send_request(
        &addr,
        &format!(
            "GET /shop/hello HTTP/1.1\r\nHost: x\r\nX-Request-Id: {id}\r\nConnection: close\r\n\r\n"
        ),
    );
    assert_eq!(status_of(&resp), 200);
    assert_eq!(header_of(&resp, "x-request-id").as_deref(), Some(id));

    // A value that is not a ULID is replaced with a freshly minted id.
    let resp = send_request(
        &addr,
        "GET /shop/hello HTTP/1.1\r\nHost: x\r\nX-Request-Id: garbage\r\nConnection: close\r\n\r\n",
    );
    let echoed = header_of(&resp, "x-request-id").unwrap();
    assert_ne!(echoed, "garbage");
    assert_eq!(echoed.len(), 26);

    handle.stop();
    host.stop_all();
}

#[test]
fn two_contexts_are_served_independently() {
    let host = Arc::new(AppHost::new());
    host.add("a", hosted_hello("/a")).unwrap();
    host.add("b", hosted_hello("/b")).unwrap();
    let (handle, addr) = start_server(Arc::clone(&host));

    let resp_a = send_request(
        &addr,
        "GET /a/hello HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n",
    );
    assert_eq!(status_of(&resp_a), 200);

    host.stop_app("/b");
    let resp_b = send_request(
        &addr,
        "GET /b/hello HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n",
    );
    assert_eq!(status_of(&resp_b), 404);

    // /a keeps serving after /b went away.
    let resp_a2 = send_request(
        &addr,
        "GET /a/hello HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n",
    );
    assert_eq!(status_of(&resp_a2), 200);

    handle.stop();
    host.stop_all();
}
