use std::time::{Duration, Instant};

use actix::{Actor, ActorContext, AsyncContext, Handler, Message, StreamHandler};
use actix_web::{web, web::Data, App, HttpRequest, HttpResponse, HttpServer, Responder};
use actix_web_actors::ws;
use enclose::enc;
use tokio::sync::mpsc;
use tracing_actix_web::TracingLogger;

use crate::{
    config::ServerConfig,
    connection::ConnectionId,
    error::Error,
    event::{InboundEvent, OutboundEvent},
    router::{Router, RouterHandle},
};

/// Serves the health route and the relay websocket until the server stops.
///
/// Fails if the listen socket cannot be bound.
pub async fn run(config: ServerConfig) -> Result<(), Error> {
    let router = RouterHandle::spawn(Router::new());

    let server = HttpServer::new(enc!((router, config) move || {
        App::new()
            .wrap(TracingLogger::default())
            .configure(|cfg| configure(cfg, &router, &config))
    }))
    .bind(config.bind_addr)?;

    tracing::info!(
        "> Ready on http://{}, websocket at {}",
        config.bind_addr,
        config.socket_path
    );
    let result = server.run().await;
    router.close();
    result.map_err(Error::from)
}

/// Mounts the health route and the websocket route backed by `router`.
fn configure(cfg: &mut web::ServiceConfig, router: &RouterHandle, config: &ServerConfig) {
    cfg.app_data(Data::new(router.clone()))
        .app_data(Data::new(config.clone()))
        .service(index)
        .route(&config.socket_path, web::get().to(socket));
}

#[actix_web::get("/")]
async fn index() -> impl Responder {
    HttpResponse::Ok().body("healthy")
}

async fn socket(
    req: HttpRequest,
    stream: web::Payload,
    router: Data<RouterHandle>,
    config: Data<ServerConfig>,
) -> impl Responder {
    let server = WebSocket::new(router.get_ref().clone(), config.get_ref());
    ws::start(server, &req, stream)
}

/// One client connection. Lives as long as the websocket does.
struct WebSocket {
    id: Option<ConnectionId>,
    router: RouterHandle,
    heartbeat_interval: Duration,
    client_timeout: Duration,
    last_seen: Instant,
}

impl WebSocket {
    fn new(router: RouterHandle, config: &ServerConfig) -> Self {
        Self {
            id: None,
            router,
            heartbeat_interval: config.heartbeat_interval,
            client_timeout: config.client_timeout,
            last_seen: Instant::now(),
        }
    }

    fn heartbeat(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(self.heartbeat_interval, |act, ctx| {
            if Instant::now().duration_since(act.last_seen) > act.client_timeout {
                tracing::warn!(connection = ?act.id, "WebSocket heartbeat failed, disconnecting");
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }
}

impl Actor for WebSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        let (outbox, mut inbox) = mpsc::unbounded_channel::<OutboundEvent>();
        let id = self.router.connect(outbox);
        self.id = Some(id);

        // The router drops the outbox on disconnect, which ends this task.
        let address = ctx.address();
        actix::spawn(enc!((address) async move {
            while let Some(event) = inbox.recv().await {
                address.do_send(Outgoing(event));
            }
        }));

        self.heartbeat(ctx);
        tracing::info!(connection = %id, "WebSocket started");
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        if let Some(id) = self.id.take() {
            self.router.disconnect(id);
            tracing::info!(connection = %id, "WebSocket stopped");
        }
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WebSocket {
    fn handle(&mut self, item: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        let message = match item {
            Ok(message) => message,
            Err(error) => {
                tracing::warn!(connection = ?self.id, "websocket protocol error: {}", error);
                ctx.stop();
                return;
            }
        };
        self.last_seen = Instant::now();

        match message {
            ws::Message::Ping(msg) => ctx.pong(&msg),
            ws::Message::Pong(_) => tracing::trace!("pong received"),
            ws::Message::Text(text) => match InboundEvent::decode(&text) {
                Ok(event) => {
                    tracing::debug!(connection = ?self.id, "received message: {}", event.name());
                    if let Some(id) = self.id {
                        self.router.dispatch(id, event);
                    }
                }
                Err(error) => {
                    tracing::warn!("failed to parse client message: {}\n{}", error, text);
                }
            },
            ws::Message::Binary(_) => tracing::warn!("binary frames are not supported, dropped"),
            ws::Message::Close(reason) => {
                ctx.close(reason);
                ctx.stop();
            }
            _ => (),
        }
    }
}

#[derive(Message, Debug)]
#[rtype(result = "()")]
struct Outgoing(OutboundEvent);

impl Handler<Outgoing> for WebSocket {
    type Result = ();

    fn handle(&mut self, msg: Outgoing, ctx: &mut Self::Context) -> Self::Result {
        match serde_json::to_string(&msg.0) {
            Ok(text) => ctx.text(text),
            Err(error) => tracing::error!("failed to serialize {}: {}", msg.0.name(), error),
        }
    }
}
