//! Browser host: canvas surface, WebSocket transport, fetch, and the
//! `WebBoard` binding exported to JavaScript.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use image::RgbaImage;
use inkboard_shared::{decode_message, encode_message, ClientMessage, Point, ServerMessage};
use js_sys::Uint8Array;
use wasm_bindgen::prelude::*;
use wasm_bindgen::{Clamped, JsCast};
use wasm_bindgen_futures::{spawn_local, JsFuture};
use web_sys::{
    BinaryType, CanvasRenderingContext2d, CloseEvent, Event, HtmlCanvasElement, ImageData,
    MessageEvent, Request, RequestInit, Response, WebSocket,
};

use crate::assets::{decode_image, AssetError};
use crate::config::BoardConfig;
use crate::generate::GenerateRequest;
use crate::input::{viewport_to_surface, Phase, PointerEvent};
use crate::session::BoardSession;
use crate::state::Tool;
use crate::surface::Surface;
use crate::sync::{Transport, TransportError, TransportEvent};

fn js_error(value: JsValue) -> String {
    value
        .as_string()
        .or_else(|| {
            value
                .dyn_ref::<js_sys::Error>()
                .map(|error| String::from(error.message()))
        })
        .unwrap_or_else(|| format!("{value:?}"))
}

fn context_2d(canvas: &HtmlCanvasElement) -> Result<CanvasRenderingContext2d, JsValue> {
    canvas
        .get_context("2d")?
        .ok_or_else(|| JsValue::from_str("2d context unavailable"))?
        .dyn_into::<CanvasRenderingContext2d>()
}

pub struct CanvasSurface {
    canvas: HtmlCanvasElement,
    ctx: CanvasRenderingContext2d,
    scratch: HtmlCanvasElement,
}

impl CanvasSurface {
    pub fn new(canvas: HtmlCanvasElement) -> Result<Self, JsValue> {
        let ctx = context_2d(&canvas)?;
        let document = web_sys::window()
            .and_then(|window| window.document())
            .ok_or_else(|| JsValue::from_str("no document"))?;
        let scratch = document
            .create_element("canvas")?
            .dyn_into::<HtmlCanvasElement>()?;
        Ok(Self {
            canvas,
            ctx,
            scratch,
        })
    }

    fn blit(
        &self,
        image: &RgbaImage,
        x: f32,
        y: f32,
        width: f32,
        height: f32,
    ) -> Result<(), JsValue> {
        let (w, h) = image.dimensions();
        let data = ImageData::new_with_u8_clamped_array_and_sh(Clamped(image.as_raw()), w, h)?;
        self.scratch.set_width(w);
        self.scratch.set_height(h);
        context_2d(&self.scratch)?.put_image_data(&data, 0.0, 0.0)?;
        self.ctx.draw_image_with_html_canvas_element_and_dw_and_dh(
            &self.scratch,
            x as f64,
            y as f64,
            width as f64,
            height as f64,
        )
    }
}

impl Surface for CanvasSurface {
    fn width(&self) -> u32 {
        self.canvas.width()
    }

    fn height(&self) -> u32 {
        self.canvas.height()
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.canvas.set_width(width);
        self.canvas.set_height(height);
    }

    fn clear(&mut self) {
        self.ctx
            .clear_rect(0.0, 0.0, self.width() as f64, self.height() as f64);
    }

    fn stroke_line(&mut self, from: Point, to: Point, color: &str, width: f32) {
        self.ctx.set_stroke_style_str(color);
        self.ctx.set_line_width(width as f64);
        self.ctx.set_line_cap("round");
        self.ctx.begin_path();
        self.ctx.move_to(from.x as f64, from.y as f64);
        self.ctx.line_to(to.x as f64, to.y as f64);
        self.ctx.stroke();
    }

    fn draw_image(&mut self, image: &RgbaImage, x: f32, y: f32, width: f32, height: f32) {
        if let Err(error) = self.blit(image, x, y, width, height) {
            log::warn!("draw_image failed: {}", js_error(error));
        }
    }
}

type EventQueue = Rc<RefCell<VecDeque<TransportEvent>>>;

/// Browser WebSocket. Callbacks queue events for [`Transport::poll`];
/// messages sent before the socket opens wait in an outbox.
pub struct BrowserTransport {
    socket: WebSocket,
    events: EventQueue,
    outbox: Rc<RefCell<Vec<Vec<u8>>>>,
    closed: bool,
}

impl BrowserTransport {
    pub fn connect(url: &str) -> Result<Self, JsValue> {
        let socket = WebSocket::new(url)?;
        socket.set_binary_type(BinaryType::Arraybuffer);
        let events: EventQueue = Rc::new(RefCell::new(VecDeque::new()));
        let outbox: Rc<RefCell<Vec<Vec<u8>>>> = Rc::new(RefCell::new(Vec::new()));

        {
            let events = events.clone();
            let outbox = outbox.clone();
            let socket_ref = socket.clone();
            let onopen = Closure::<dyn FnMut(Event)>::new(move |_| {
                for payload in outbox.borrow_mut().drain(..) {
                    let _ = socket_ref.send_with_u8_array(&payload);
                }
                events.borrow_mut().push_back(TransportEvent::Connected);
            });
            socket.set_onopen(Some(onopen.as_ref().unchecked_ref()));
            onopen.forget();
        }

        {
            let events = events.clone();
            let onclose = Closure::<dyn FnMut(CloseEvent)>::new(move |_| {
                events.borrow_mut().push_back(TransportEvent::Disconnected);
            });
            socket.set_onclose(Some(onclose.as_ref().unchecked_ref()));
            onclose.forget();
        }

        {
            let events = events.clone();
            let onerror = Closure::<dyn FnMut(Event)>::new(move |_| {
                events
                    .borrow_mut()
                    .push_back(TransportEvent::Error("websocket error".to_string()));
            });
            socket.set_onerror(Some(onerror.as_ref().unchecked_ref()));
            onerror.forget();
        }

        {
            let events = events.clone();
            let onmessage = Closure::<dyn FnMut(MessageEvent)>::new(move |event: MessageEvent| {
                let message = if let Ok(buffer) = event.data().dyn_into::<js_sys::ArrayBuffer>() {
                    decode_message::<ServerMessage>(&Uint8Array::new(&buffer).to_vec())
                        .map_err(|error| error.to_string())
                } else if let Some(text) = event.data().as_string() {
                    serde_json::from_str::<ServerMessage>(&text).map_err(|error| error.to_string())
                } else {
                    Err("frame is neither text nor arraybuffer".to_string())
                };
                match message {
                    Ok(message) => events
                        .borrow_mut()
                        .push_back(TransportEvent::Message(message)),
                    Err(error) => log::error!("bad websocket frame: {error}"),
                }
            });
            socket.set_onmessage(Some(onmessage.as_ref().unchecked_ref()));
            onmessage.forget();
        }

        Ok(Self {
            socket,
            events,
            outbox,
            closed: false,
        })
    }
}

impl Transport for BrowserTransport {
    fn send(&mut self, message: &ClientMessage) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        let payload =
            encode_message(message).map_err(|error| TransportError::Encode(error.to_string()))?;
        match self.socket.ready_state() {
            WebSocket::CONNECTING => {
                self.outbox.borrow_mut().push(payload);
                Ok(())
            }
            WebSocket::OPEN => self
                .socket
                .send_with_u8_array(&payload)
                .map_err(|_| TransportError::Closed),
            _ => Err(TransportError::Closed),
        }
    }

    fn poll(&mut self) -> Vec<TransportEvent> {
        self.events.borrow_mut().drain(..).collect()
    }

    fn close(&mut self) {
        self.closed = true;
        self.outbox.borrow_mut().clear();
        let _ = self.socket.close();
    }
}

async fn fetch(request: Request) -> Result<Response, String> {
    let window = web_sys::window().ok_or_else(|| "no window".to_string())?;
    JsFuture::from(window.fetch_with_request(&request))
        .await
        .map_err(js_error)?
        .dyn_into::<Response>()
        .map_err(js_error)
}

pub async fn post_json(url: &str, body: &str) -> Result<(u16, String), String> {
    let init = RequestInit::new();
    init.set_method("POST");
    init.set_body(&JsValue::from_str(body));
    let request = Request::new_with_str_and_init(url, &init).map_err(js_error)?;
    request
        .headers()
        .set("Content-Type", "application/json")
        .map_err(js_error)?;
    let response = fetch(request).await?;
    let text = JsFuture::from(response.text().map_err(js_error)?)
        .await
        .map_err(js_error)?
        .as_string()
        .unwrap_or_default();
    Ok((response.status(), text))
}

pub async fn fetch_image(url: &str) -> Result<RgbaImage, AssetError> {
    let remote = |message: String| AssetError::Remote(message);
    let request = Request::new_with_str(url).map_err(|error| remote(js_error(error)))?;
    let response = fetch(request).await.map_err(remote)?;
    if !response.ok() {
        return Err(remote(format!("HTTP {}", response.status())));
    }
    let buffer = JsFuture::from(response.array_buffer().map_err(|error| remote(js_error(error)))?)
        .await
        .map_err(|error| remote(js_error(error)))?;
    decode_image(&Uint8Array::new(&buffer).to_vec())
}

type WebSession = BoardSession<CanvasSurface, BrowserTransport>;

#[wasm_bindgen(start)]
pub fn start() {
    console_error_panic_hook::set_once();
    let _ = console_log::init_with_level(log::Level::Info);
}

#[wasm_bindgen]
pub struct WebBoard {
    session: Rc<RefCell<WebSession>>,
    canvas: HtmlCanvasElement,
}

impl WebBoard {
    fn pointer(&self, phase: Phase, client_x: f64, client_y: f64, touches: u32) {
        let rect = self.canvas.get_bounding_client_rect();
        let size = (self.canvas.width(), self.canvas.height());
        let Some((x, y)) = viewport_to_surface(
            client_x,
            client_y,
            (rect.left(), rect.top(), rect.width(), rect.height()),
            size,
        ) else {
            return;
        };
        let event = if touches == 0 {
            PointerEvent::mouse(phase, x, y)
        } else {
            PointerEvent::touch(phase, touches, x, y)
        };
        self.session.borrow_mut().pointer(event);
    }
}

#[wasm_bindgen]
impl WebBoard {
    /// `config_json` is a serialized `BoardConfig`.
    #[wasm_bindgen(constructor)]
    pub fn new(canvas: HtmlCanvasElement, config_json: &str) -> Result<WebBoard, JsValue> {
        let config = BoardConfig::from_json(config_json)
            .map_err(|error| JsValue::from_str(&error.to_string()))?;
        let transport = BrowserTransport::connect(&config.collection_url())?;
        let surface = CanvasSurface::new(canvas.clone())?;
        let session = BoardSession::new(config, surface, transport)
            .map_err(|error| JsValue::from_str(&error.to_string()))?;
        Ok(WebBoard {
            session: Rc::new(RefCell::new(session)),
            canvas,
        })
    }

    pub fn sign_in(&self, token: Option<String>) -> Result<(), JsValue> {
        self.session
            .borrow_mut()
            .start(token.as_deref())
            .map_err(|error| JsValue::from_str(&error.to_string()))
    }

    pub fn pump(&self) -> usize {
        let (handled, remote) = {
            let mut session = self.session.borrow_mut();
            let handled = session.pump();
            (handled, session.load_inline_assets())
        };
        for url in remote {
            let session = self.session.clone();
            let cancel = session.borrow().cancel_token();
            spawn_local(async move {
                let result = fetch_image(&url).await;
                if !cancel.is_cancelled() {
                    session.borrow_mut().asset_loaded(&url, result);
                }
            });
        }
        handled
    }

    /// `touches` is 0 for mouse and pen input.
    pub fn pointer_down(&self, client_x: f64, client_y: f64, touches: u32) {
        self.pointer(Phase::Down, client_x, client_y, touches);
    }

    pub fn pointer_move(&self, client_x: f64, client_y: f64, touches: u32) {
        self.pointer(Phase::Move, client_x, client_y, touches);
    }

    pub fn pointer_up(&self, client_x: f64, client_y: f64, touches: u32) {
        self.pointer(Phase::Up, client_x, client_y, touches);
    }

    pub fn resize(&self, width: u32, height: u32) {
        self.session.borrow_mut().resize(width, height);
    }

    pub fn clear_all(&self) {
        self.session.borrow_mut().clear_all();
    }

    pub fn set_color(&self, color: &str) {
        self.session.borrow_mut().draw_state_mut().set_color(color);
    }

    pub fn set_size(&self, size: f32) {
        self.session.borrow_mut().draw_state_mut().set_size(size);
    }

    pub fn set_eraser(&self, enabled: bool) {
        self.session.borrow_mut().draw_state_mut().tool =
            if enabled { Tool::Eraser } else { Tool::Pen };
    }

    pub fn generate(&self, prompt: &str) -> Result<(), JsValue> {
        let (url, body, cancel) = {
            let session = self.session.borrow();
            let generate = session.config().generate.clone().ok_or_else(|| {
                JsValue::from_str("image generation is not configured")
            })?;
            let body = GenerateRequest::new(prompt)
                .and_then(|request| request.to_json())
                .map_err(|error| JsValue::from_str(&error.to_string()))?;
            (generate.request_url(), body, session.cancel_token())
        };
        let session = self.session.clone();
        spawn_local(async move {
            let outcome = post_json(&url, &body).await;
            if cancel.is_cancelled() {
                return;
            }
            let (status, text) = match outcome {
                Ok(response) => response,
                Err(error) => (0, serde_json::json!({ "error": { "message": error } }).to_string()),
            };
            session.borrow_mut().merge_generated(status, &text);
        });
        Ok(())
    }

    pub fn last_error(&self) -> Option<String> {
        self.session
            .borrow()
            .last_error()
            .map(|error| error.to_string())
    }

    pub fn identity(&self) -> Option<String> {
        self.session.borrow().identity().map(str::to_string)
    }

    pub fn teardown(&self) {
        self.session.borrow_mut().teardown();
    }
}
