use serde::Deserialize;

use canteen_server::catalog::ItemDraft;

/// One entry of a menu file.
#[derive(Deserialize, Debug)]
pub struct MenuEntry {
    pub name: String,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub image_url: Option<String>,
}

impl From<MenuEntry> for ItemDraft {
    fn from(entry: MenuEntry) -> Self {
        ItemDraft {
            name: entry.name,
            options: entry.options,
            image_url: entry.image_url,
        }
    }
}

pub fn parse_menu(raw: &str) -> serde_json::Result<Vec<MenuEntry>> {
    serde_json::from_str(raw)
}
