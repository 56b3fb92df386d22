// Telemeter - Sensor readings exporter for Prometheus and MQTT
//
// Copyright 2026 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

use crate::metrics::MetricsExposition;
use hyper::header::{HeaderValue, ALLOW, CONTENT_TYPE};
use hyper::{Body, Method, Request, Response, StatusCode};
use prometheus::TEXT_FORMAT;
use std::sync::Arc;

/// Global state shared between all HTTP requests via Arc.
pub struct RequestContext {
    exposition: MetricsExposition,
}

impl RequestContext {
    pub fn new(exposition: MetricsExposition) -> Self {
        RequestContext { exposition }
    }
}

const METRICS_PATH: &str = "/metrics";

/// Render Prometheus metrics in the text exposition format at the path `/metrics`
/// for `GET` requests.
///
/// Other methods on `/metrics` get a 405 with an `Allow` header and any other path
/// gets a 404. If metrics can't be encoded, an HTTP 500 will be returned and the
/// error will be logged.
pub async fn http_route(req: Request<Body>, context: Arc<RequestContext>) -> Result<Response<Body>, hyper::Error> {
    let res = if req.uri().path() != METRICS_PATH {
        status_response(StatusCode::NOT_FOUND)
    } else if *req.method() != Method::GET {
        let mut res = status_response(StatusCode::METHOD_NOT_ALLOWED);
        res.headers_mut().insert(ALLOW, HeaderValue::from_static("GET"));
        res
    } else {
        metrics_response(&context)
    };

    tracing::debug!(
        message = "handled request",
        method = %req.method(),
        path = req.uri().path(),
        status = res.status().as_u16(),
    );

    Ok(res)
}

fn metrics_response(context: &RequestContext) -> Response<Body> {
    match context.exposition.encoded_text() {
        Ok(buffer) => {
            let mut res = Response::new(Body::from(buffer));
            res.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static(TEXT_FORMAT));
            res
        }
        Err(e) => {
            tracing::error!(message = "error scraping metrics", error = %e);
            status_response(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

fn status_response(code: StatusCode) -> Response<Body> {
    let mut res = Response::new(Body::empty());
    *res.status_mut() = code;
    res
}
