use crate::windows::WindowRecord;
use std::collections::HashMap;
use tabctl_core::{
    tree::{Workspace, WorkspaceIndex},
    Tab, TabId, WindowId,
};

/// Wide separator in front of the tab id. The id is read back from after its
/// last occurrence, so titles containing it stay unambiguous.
pub const ID_SEPARATOR: &str = "\t\u{2502} ";
pub const SOUND_MARKER: &str = "[sound] ";
pub const NO_WORKSPACE_LABEL: &str = "-";

const ANSI_RESET: &str = "\x1b[0m";

pub const PALETTE: [(u8, u8, u8); 20] = [
    (230, 25, 75),
    (60, 180, 75),
    (255, 225, 25),
    (67, 99, 216),
    (245, 130, 49),
    (145, 30, 180),
    (66, 212, 244),
    (240, 50, 230),
    (191, 239, 69),
    (250, 190, 212),
    (70, 153, 144),
    (220, 190, 255),
    (154, 99, 36),
    (255, 250, 200),
    (128, 0, 0),
    (170, 255, 195),
    (128, 128, 0),
    (255, 216, 177),
    (0, 0, 117),
    (169, 169, 169),
];

pub fn band_color(band: usize) -> (u8, u8, u8) {
    PALETTE[band % PALETTE.len()]
}

#[derive(Debug, Clone, PartialEq)]
pub struct DisplayEntry<'a> {
    pub tab: &'a Tab,
    pub workspace: Option<Workspace>,
    pub band: usize,
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
struct SortKey {
    workspace_num: u64,
    workspace_missing: bool,
    workspace_name: String,
    window_ordinal: u64,
}

/// Sorts tabs by workspace, then by the order their window first appears in
/// `tabs`. Tabs whose window or workspace is unknown sort last. The sort is
/// stable, so tabs of one window keep the controller's order.
pub fn order_tabs<'a>(
    tabs: &'a [Tab],
    records: &HashMap<WindowId, WindowRecord>,
    index: &WorkspaceIndex,
) -> Vec<DisplayEntry<'a>> {
    let mut ordinals: HashMap<WindowId, u64> = HashMap::new();
    for tab in tabs {
        let next = ordinals.len() as u64;
        ordinals.entry(tab.window_id).or_insert(next);
    }

    let mut keyed = tabs
        .iter()
        .map(|tab| {
            let workspace = records
                .get(&tab.window_id)
                .and_then(|record| index.get(record.container_id))
                .cloned();
            let key = SortKey {
                workspace_num: workspace
                    .as_ref()
                    .and_then(|ws| ws.num)
                    .and_then(|num| u64::try_from(num).ok())
                    .unwrap_or(u64::MAX),
                workspace_missing: workspace.is_none(),
                workspace_name: workspace
                    .as_ref()
                    .map(|ws| ws.name.clone())
                    .unwrap_or_default(),
                window_ordinal: ordinals.get(&tab.window_id).copied().unwrap_or(u64::MAX),
            };
            (key, tab, workspace)
        })
        .collect::<Vec<_>>();
    keyed.sort_by(|a, b| a.0.cmp(&b.0));

    let mut bands: HashMap<WindowId, usize> = HashMap::new();
    keyed
        .into_iter()
        .map(|(_, tab, workspace)| {
            let next = bands.len() + 1;
            let band = *bands.entry(tab.window_id).or_insert(next);
            DisplayEntry {
                tab,
                workspace,
                band,
            }
        })
        .collect()
}

fn sanitize(text: &str) -> String {
    text.chars()
        .map(|ch| if matches!(ch, '\n' | '\r' | '\t') { ' ' } else { ch })
        .collect()
}

pub fn render_line(entry: &DisplayEntry<'_>) -> String {
    let workspace = entry
        .workspace
        .as_ref()
        .map(|ws| sanitize(&ws.name))
        .unwrap_or_else(|| NO_WORKSPACE_LABEL.to_string());
    let (r, g, b) = band_color(entry.band);
    let sound = if entry.tab.audible { SOUND_MARKER } else { "" };
    format!(
        "{workspace} \x1b[38;2;{r};{g};{b}m{band}{ANSI_RESET} {sound}{title} ({url}){ID_SEPARATOR}{id}",
        band = entry.band,
        title = sanitize(&entry.tab.title),
        url = sanitize(&entry.tab.url),
        id = entry.tab.id,
    )
}

pub fn render_lines(entries: &[DisplayEntry<'_>]) -> Vec<String> {
    entries.iter().map(render_line).collect()
}

/// Reads the tab id back out of a picked line. Lines without the separator
/// are accepted when they start with the id.
pub fn parse_selected_id(line: &str) -> Option<TabId> {
    let tail = match line.rsplit_once(ID_SEPARATOR) {
        Some((_, tail)) => tail,
        None => line.split_whitespace().next()?,
    };
    tail.trim().parse().ok()
}
