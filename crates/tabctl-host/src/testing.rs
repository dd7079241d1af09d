use crate::codec::{read_frame, write_raw_frame};
use crate::commander::CommanderError;
use crate::compositor::{Compositor, CompositorError};
use crate::display::{parse_selected_id, ID_SEPARATOR};
use crate::notify::Notifier;
use crate::picker::{Picker, PickerError};
use crate::windows::MarkerControl;
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use serde_json::{json, Map, Value};
use std::{
    collections::HashMap,
    future::Future,
    sync::{Arc, Mutex},
    time::Duration,
};
use tabctl_core::{
    tree::{ContainerId, Node, NodeType},
    wire::{
        decode_body, encode_frame, Message, MAX_INBOUND_FRAME_BYTES, MAX_OUTBOUND_FRAME_BYTES,
    },
    Tab, TabId, WindowId,
};
use tokio::io::{DuplexStream, WriteHalf};

pub fn tab(id: TabId, window_id: WindowId, title: &str) -> Tab {
    Tab {
        id,
        window_id,
        title: title.to_string(),
        url: format!("https://example.com/{id}"),
        audible: false,
        active: false,
        extra: Map::new(),
    }
}

pub fn node(id: ContainerId, node_type: NodeType, name: &str) -> Node {
    Node {
        id,
        name: Some(name.to_string()),
        node_type,
        num: None,
        nodes: Vec::new(),
        floating_nodes: Vec::new(),
    }
}

pub fn workspace_node(id: ContainerId, name: &str, num: Option<i64>, nodes: Vec<Node>) -> Node {
    Node {
        num,
        nodes,
        ..node(id, NodeType::Workspace, name)
    }
}

/// Root, one output, and a workspace per distinct number holding the given
/// `(container, workspace number)` windows.
pub fn desktop_tree(windows: &[(ContainerId, i64)]) -> Node {
    let mut workspaces: Vec<Node> = Vec::new();
    for &(container, num) in windows {
        let leaf = node(container, NodeType::Con, "Mozilla Firefox");
        match workspaces.iter_mut().find(|ws| ws.num == Some(num)) {
            Some(ws) => ws.nodes.push(leaf),
            None => workspaces.push(workspace_node(
                1000 + num,
                &num.to_string(),
                Some(num),
                vec![leaf],
            )),
        }
    }
    let output = Node {
        nodes: workspaces,
        ..node(2, NodeType::Output, "eDP-1")
    };
    Node {
        nodes: vec![output],
        ..node(1, NodeType::Root, "root")
    }
}

fn find_mut(node: &mut Node, id: ContainerId) -> Option<&mut Node> {
    if node.id == id {
        return Some(node);
    }
    node.nodes
        .iter_mut()
        .chain(node.floating_nodes.iter_mut())
        .find_map(|child| find_mut(child, id))
}

#[derive(Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    pub fn messages(&self) -> Vec<(String, String)> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, summary: &str, body: &str) {
        self.messages
            .lock()
            .unwrap()
            .push((summary.to_string(), body.to_string()));
    }
}

#[derive(Default)]
struct CompositorState {
    markers: HashMap<ContainerId, String>,
    hidden_polls: usize,
    queries: usize,
    focused: Vec<ContainerId>,
    fail_focus: bool,
}

/// In-memory compositor. Markers shown by the fake controller are prefixed to
/// container names on every tree query.
pub struct FakeCompositor {
    tree: Node,
    state: Mutex<CompositorState>,
}

impl FakeCompositor {
    pub fn new(tree: Node) -> Self {
        Self {
            tree,
            state: Mutex::new(CompositorState::default()),
        }
    }

    pub fn show_marker(&self, container: ContainerId, marker: &str) {
        self.state
            .lock()
            .unwrap()
            .markers
            .insert(container, marker.to_string());
    }

    pub fn clear_marker(&self, container: ContainerId) {
        self.state.lock().unwrap().markers.remove(&container);
    }

    /// The next `polls` tree queries will not show markers yet.
    pub fn hide_markers_for(&self, polls: usize) {
        self.state.lock().unwrap().hidden_polls = polls;
    }

    pub fn fail_focus(&self, fail: bool) {
        self.state.lock().unwrap().fail_focus = fail;
    }

    pub fn tree_queries(&self) -> usize {
        self.state.lock().unwrap().queries
    }

    pub fn focused(&self) -> Vec<ContainerId> {
        self.state.lock().unwrap().focused.clone()
    }
}

#[async_trait]
impl Compositor for FakeCompositor {
    async fn get_tree(&self) -> Result<Node, CompositorError> {
        let mut state = self.state.lock().unwrap();
        state.queries += 1;
        let mut tree = self.tree.clone();
        if state.hidden_polls > 0 {
            state.hidden_polls -= 1;
            return Ok(tree);
        }
        for (container, marker) in &state.markers {
            if let Some(target) = find_mut(&mut tree, *container) {
                let name = target.name.take().unwrap_or_default();
                target.name = Some(format!("{marker} {name}"));
            }
        }
        Ok(tree)
    }

    async fn focus(&self, container: ContainerId) -> Result<(), CompositorError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_focus {
            return Err(CompositorError::Rejected("No matching node".to_string()));
        }
        state.focused.push(container);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkerCall {
    Enable(WindowId),
    Disable(WindowId),
}

/// Controller stand-in that marks windows directly in a [`FakeCompositor`].
pub struct FakeMarkers {
    compositor: Arc<FakeCompositor>,
    containers: HashMap<WindowId, ContainerId>,
    calls: Mutex<Vec<MarkerCall>>,
    fail_enable: Mutex<bool>,
}

impl FakeMarkers {
    pub fn new(compositor: Arc<FakeCompositor>, containers: &[(WindowId, ContainerId)]) -> Self {
        Self {
            compositor,
            containers: containers.iter().copied().collect(),
            calls: Mutex::new(Vec::new()),
            fail_enable: Mutex::new(false),
        }
    }

    pub fn calls(&self) -> Vec<MarkerCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn enable_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, MarkerCall::Enable(_)))
            .count()
    }

    pub fn fail_enable(&self, fail: bool) {
        *self.fail_enable.lock().unwrap() = fail;
    }

    pub fn delay_polls(&self, polls: usize) {
        self.compositor.hide_markers_for(polls);
    }
}

#[async_trait]
impl MarkerControl for FakeMarkers {
    async fn enable_marker(&self, window: WindowId, marker: &str) -> Result<String, CommanderError> {
        self.calls.lock().unwrap().push(MarkerCall::Enable(window));
        if *self.fail_enable.lock().unwrap() {
            return Err(CommanderError::StreamClosed);
        }
        if let Some(container) = self.containers.get(&window) {
            self.compositor.show_marker(*container, marker);
        }
        Ok(marker.to_string())
    }

    async fn disable_marker(&self, window: WindowId) -> Result<(), CommanderError> {
        self.calls.lock().unwrap().push(MarkerCall::Disable(window));
        if let Some(container) = self.containers.get(&window) {
            self.compositor.clear_marker(*container);
        }
        Ok(())
    }
}

type Hook = Box<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

enum PickerAnswer {
    Cancel,
    Line(String),
    Tab(TabId),
}

pub struct FakePicker {
    answer: PickerAnswer,
    offered: Mutex<Vec<String>>,
    before_answer: Mutex<Option<Hook>>,
}

impl FakePicker {
    fn with(answer: PickerAnswer) -> Self {
        Self {
            answer,
            offered: Mutex::new(Vec::new()),
            before_answer: Mutex::new(None),
        }
    }

    pub fn cancel() -> Self {
        Self::with(PickerAnswer::Cancel)
    }

    pub fn answer(line: &str) -> Self {
        Self::with(PickerAnswer::Line(line.to_string()))
    }

    /// Picks the offered line for `tab`, or a synthetic line if none matches.
    pub fn choose_tab(tab: TabId) -> Self {
        Self::with(PickerAnswer::Tab(tab))
    }

    pub fn before_answer<F, Fut>(&self, hook: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        *self.before_answer.lock().unwrap() = Some(Box::new(move || -> BoxFuture<'static, ()> {
            Box::pin(hook())
        }));
    }

    pub fn offered(&self) -> Vec<String> {
        self.offered.lock().unwrap().clone()
    }
}

#[async_trait]
impl Picker for FakePicker {
    async fn pick(&self, lines: &[String]) -> Result<Option<String>, PickerError> {
        *self.offered.lock().unwrap() = lines.to_vec();
        let hook = self.before_answer.lock().unwrap().as_ref().map(|hook| hook());
        if let Some(hook) = hook {
            hook.await;
        }
        Ok(match &self.answer {
            PickerAnswer::Cancel => None,
            PickerAnswer::Line(line) => Some(line.clone()),
            PickerAnswer::Tab(id) => Some(
                lines
                    .iter()
                    .find(|line| parse_selected_id(line) == Some(*id))
                    .cloned()
                    .unwrap_or_else(|| format!("synthetic{ID_SEPARATOR}{id}")),
            ),
        })
    }
}

#[derive(Default)]
struct BrowserState {
    received: Vec<Message>,
    subscription: Option<u64>,
}

/// Test side of a fake browser extension talking to the host over a duplex.
#[derive(Clone)]
pub struct BrowserHandle {
    state: Arc<Mutex<BrowserState>>,
    writer: Arc<tokio::sync::Mutex<WriteHalf<DuplexStream>>>,
}

impl BrowserHandle {
    pub fn commands_named(&self, name: &str) -> Vec<Message> {
        self.state
            .lock()
            .unwrap()
            .received
            .iter()
            .filter(|message| message.command.as_deref() == Some(name))
            .cloned()
            .collect()
    }

    pub fn command(&self, name: &str) -> Option<Message> {
        self.commands_named(name).into_iter().next()
    }

    pub fn clear(&self) {
        self.state.lock().unwrap().received.clear();
    }

    pub async fn wait_for_command(&self, name: &str) {
        for _ in 0..150 {
            if self.command(name).is_some() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("controller never received {name}");
    }

    pub async fn push_window_closed(&self, results: Value) {
        let id = self
            .state
            .lock()
            .unwrap()
            .subscription
            .expect("no close subscription");
        send(&self.writer, &Message::push(id, results)).await;
    }
}

async fn send(writer: &tokio::sync::Mutex<WriteHalf<DuplexStream>>, message: &Message) {
    let frame = encode_frame(message, MAX_OUTBOUND_FRAME_BYTES).expect("encode");
    write_raw_frame(&mut *writer.lock().await, &frame)
        .await
        .expect("browser write");
}

/// Spawns a fake controller that serves `tabs` and marks windows in
/// `compositor` according to `containers`. Returns the host's end.
pub fn spawn_browser(
    tabs: Vec<Tab>,
    containers: &[(WindowId, ContainerId)],
    compositor: Arc<FakeCompositor>,
) -> (BrowserHandle, DuplexStream) {
    let (host_side, browser_side) = tokio::io::duplex(256 * 1024);
    let (mut reader, writer) = tokio::io::split(browser_side);
    let handle = BrowserHandle {
        state: Arc::new(Mutex::new(BrowserState::default())),
        writer: Arc::new(tokio::sync::Mutex::new(writer)),
    };
    let containers: HashMap<WindowId, ContainerId> = containers.iter().copied().collect();

    let browser = handle.clone();
    tokio::spawn(async move {
        while let Ok(Some(body)) = read_frame(&mut reader, MAX_INBOUND_FRAME_BYTES).await {
            let Ok(message) = decode_body::<Message>(&body) else {
                continue;
            };
            browser.state.lock().unwrap().received.push(message.clone());
            let Some(id) = message.id else {
                continue;
            };
            let window = message.args["windowId"].as_i64();
            let container = window.and_then(|window| containers.get(&window).copied());

            let results = match message.command.as_deref() {
                Some("get_tabs") => serde_json::to_value(&tabs).expect("tabs"),
                Some("enable_identify_marker") => {
                    let marker = message.args["marker"].as_str().unwrap_or_default();
                    if let Some(container) = container {
                        compositor.show_marker(container, marker);
                    }
                    json!({ "identifier": marker })
                }
                Some("disable_identify_marker") => {
                    if let Some(container) = container {
                        compositor.clear_marker(container);
                    }
                    Value::Null
                }
                Some("subscribe_window_closed") => {
                    browser.state.lock().unwrap().subscription = Some(id);
                    continue;
                }
                Some("focus_tab") => json!({ "ok": true }),
                _ => Value::Null,
            };
            send(&browser.writer, &Message::results(id, results)).await;
        }
    });

    (handle, host_side)
}
