//
//  Sample server.
//
//  Listens on localhost:4918, plain http, serves an in-memory store.
//  Connect to http://localhost:4918/
//

use std::convert::Infallible;
use std::error::Error;
use std::net::SocketAddr;

use clap::Parser;
use headers::{Authorization, HeaderMapExt, authorization::Basic};
use hyper::{server::conn::http1, service::service_fn};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;

use webdav_core::{DavConfig, DavHandler, body::Body, memstore::MemStore};

#[derive(Clone)]
struct Server {
    dh: DavHandler,
    auth: bool,
}

impl Server {
    fn new(cli: &Cli) -> Self {
        let mut config = DavHandler::builder()
            .store(MemStore::new())
            .read_only(cli.read_only)
            .lazy_folder_creation(cli.lazy_folders);
        if let Some(ref prefix) = cli.prefix {
            config = config.strip_prefix(prefix.clone());
        }
        Server {
            dh: config.build_handler(),
            auth: cli.auth,
        }
    }

    async fn handle(
        &self,
        req: hyper::Request<hyper::body::Incoming>,
    ) -> Result<hyper::Response<Body>, Infallible> {
        if !self.auth {
            return Ok(self.dh.handle(req).await);
        }
        // the user name becomes the principal, and the default lock owner.
        match req.headers().typed_get::<Authorization<Basic>>() {
            Some(Authorization(basic)) => {
                let config = DavConfig::new().principal(basic.username());
                Ok(self.dh.handle_with(config, req).await)
            }
            None => {
                let mut response = hyper::Response::new(Body::from("please auth"));
                *response.status_mut() = hyper::StatusCode::UNAUTHORIZED;
                response.headers_mut().insert(
                    "WWW-Authenticate",
                    hyper::header::HeaderValue::from_static("Basic realm=\"webdav\""),
                );
                Ok(response)
            }
        }
    }
}

#[derive(Debug, clap::Parser)]
#[command(about, version)]
struct Cli {
    /// port to listen on
    #[arg(short, long, default_value = "4918")]
    port: u16,
    /// url prefix to strip
    #[arg(long)]
    prefix: Option<String>,
    /// refuse every mutating method
    #[arg(short, long)]
    read_only: bool,
    /// create missing parent folders on PUT
    #[arg(short, long)]
    lazy_folders: bool,
    /// require http basic auth
    #[arg(short, long)]
    auth: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let cli = Cli::parse();
    let server = Server::new(&cli);

    let addr = SocketAddr::from(([127, 0, 0, 1], cli.port));
    let listener = TcpListener::bind(addr).await?;
    println!("Serving an in-memory store on {}", addr);

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let server = server.clone();
        tokio::task::spawn(async move {
            let service = service_fn(move |req| {
                let server = server.clone();
                async move { server.handle(req).await }
            });
            if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                eprintln!("Failed serving connection: {:?}", err);
            }
        });
    }
}
