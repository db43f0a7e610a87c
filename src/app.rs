use anyhow::{Context, Result};
use crossterm::event::{KeyCode, KeyEvent};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

use crate::api::ApiClient;
use crate::config::Page;
use crate::constants::{self, Constant, CONSTANT_URL, DELETE_CONSTANT_URL};
use crate::kit::{self, Group};
use crate::write::{ConfirmedWrite, Settlement, Variant, WriteRequest, WriteState};

/// Status messages clear after this long
const STATUS_TIMEOUT: Duration = Duration::from_secs(3);

/// Width of the value column and the buttons, in grid columns out of 12
pub const EDIT_WIDTH: u16 = 10;
pub const BTN_WIDTH: u16 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Popup {
    None,
    Help,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Button {
    Save,
    Delete,
    Add,
}

/// Identifies one write control on the constants screen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteKey {
    pub card: usize,
    pub button: Button,
}

/// State the write controls report into
#[derive(Debug, Default)]
pub struct WriteEffects {
    pub reload: bool,
    pub error: Option<String>,
    pub finished: Option<String>,
}

/// A place the cursor can sit inside a constant card
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Slot {
    Value { entry: usize, field: Option<String> },
    Time { entry: usize },
    ExtraValue { field: Option<String> },
    ExtraTime,
    Button(Button),
}

pub struct ConstantCard {
    pub original: Constant,
    pub edited: Constant,
    /// Blank entry for adding a new dated value
    pub extra: Option<Constant>,
    pub save: ConfirmedWrite<WriteEffects>,
    pub delete: ConfirmedWrite<WriteEffects>,
    pub add: Option<ConfirmedWrite<WriteEffects>>,
}

impl Button {
    pub fn label(self) -> &'static str {
        match self {
            Button::Save => "Save",
            Button::Delete => "Delete",
            Button::Add => "Add",
        }
    }

    fn variant(self) -> Variant {
        match self {
            Button::Save => Variant::Contained,
            Button::Delete => Variant::Text,
            Button::Add => Variant::Outlined,
        }
    }
}

fn write_control(button: Button, prompt: &str, request: WriteRequest) -> ConfirmedWrite<WriteEffects> {
    let done = format!("{} complete", button.label());
    ConfirmedWrite::new(button.label(), request)
        .prompt(prompt)
        .variant(button.variant())
        .destructive(button == Button::Delete)
        .width(BTN_WIDTH)
        .on_data(|effects: &mut WriteEffects, _| effects.reload = true)
        .on_error(|effects: &mut WriteEffects, error| effects.error = Some(error.to_string()))
        .on_complete(move |effects: &mut WriteEffects| effects.finished = Some(done.clone()))
}

impl ConstantCard {
    pub fn new(constant: Constant) -> Result<Self> {
        let extra = (!constant.single).then(|| constant.empty_copy());

        let save = write_control(
            Button::Save,
            "Modifying the constant will change how data are processed.",
            WriteRequest::new(CONSTANT_URL),
        );
        let delete = write_control(
            Button::Delete,
            "Deleting the constant will change how data are processed.",
            WriteRequest::new(DELETE_CONSTANT_URL).json(constant.name.clone().into()),
        );
        let add = extra.as_ref().map(|_| {
            write_control(
                Button::Add,
                "Adding a new value for the constant will change how data are processed.",
                WriteRequest::new(CONSTANT_URL),
            )
            .pad(EDIT_WIDTH)
        });

        let mut card = Self {
            original: constant.clone(),
            edited: constant,
            extra,
            save,
            delete,
            add,
        };
        card.sync()?;
        Ok(card)
    }

    pub fn modified(&self) -> bool {
        self.edited != self.original
    }

    /// Refresh payloads and disabled flags after an edit.
    ///
    /// Save and Add stay disabled if their payload cannot be built.
    fn sync(&mut self) -> Result<()> {
        let modified = self.modified();
        self.delete.set_disabled(modified);

        self.save.set_disabled(true);
        let payload = to_json(&self.edited.convert_types())?;
        self.save.set_request(WriteRequest::new(CONSTANT_URL).json(payload));
        self.save.set_disabled(!modified);

        if let (Some(add), Some(extra)) = (self.add.as_mut(), self.extra.as_ref()) {
            add.set_disabled(true);
            let payload = to_json(&extra.convert_types())?;
            add.set_request(WriteRequest::new(CONSTANT_URL).json(payload));
            add.set_disabled(extra.first_value_empty());
        }
        Ok(())
    }

    pub fn slots(&self) -> Vec<Slot> {
        let mut slots = Vec::new();
        for entry in 0..self.edited.values.len() {
            match self.edited.field_names(entry) {
                Some(fields) => slots.extend(fields.into_iter().map(|f| Slot::Value {
                    entry,
                    field: Some(f),
                })),
                None => slots.push(Slot::Value { entry, field: None }),
            }
            if !self.edited.single {
                slots.push(Slot::Time { entry });
            }
        }
        slots.push(Slot::Button(Button::Delete));
        slots.push(Slot::Button(Button::Save));

        if let Some(extra) = &self.extra {
            match extra.field_names(0) {
                Some(fields) => {
                    slots.extend(fields.into_iter().map(|f| Slot::ExtraValue { field: Some(f) }))
                }
                None => slots.push(Slot::ExtraValue { field: None }),
            }
            slots.push(Slot::ExtraTime);
            slots.push(Slot::Button(Button::Add));
        }
        slots
    }

    pub fn control(&self, button: Button) -> Option<&ConfirmedWrite<WriteEffects>> {
        match button {
            Button::Save => Some(&self.save),
            Button::Delete => Some(&self.delete),
            Button::Add => self.add.as_ref(),
        }
    }

    pub fn control_mut(&mut self, button: Button) -> Option<&mut ConfirmedWrite<WriteEffects>> {
        match button {
            Button::Save => Some(&mut self.save),
            Button::Delete => Some(&mut self.delete),
            Button::Add => self.add.as_mut(),
        }
    }

    pub fn slot_text(&self, slot: &Slot) -> String {
        match slot {
            Slot::Value { entry, field } => self.edited.field_text(*entry, field.as_deref()),
            Slot::Time { entry } => self.edited.values[*entry].time.clone().unwrap_or_default(),
            Slot::ExtraValue { field } => self
                .extra
                .as_ref()
                .map(|e| e.field_text(0, field.as_deref()))
                .unwrap_or_default(),
            Slot::ExtraTime => self
                .extra
                .as_ref()
                .and_then(|e| e.values.first())
                .and_then(|v| v.time.clone())
                .unwrap_or_default(),
            Slot::Button(_) => String::new(),
        }
    }

    pub fn set_slot_text(&mut self, slot: &Slot, text: String) -> Result<()> {
        match slot {
            Slot::Value { entry, field } => self.edited.set_field_text(*entry, field.as_deref(), text),
            Slot::Time { entry } => self.edited.set_time(*entry, text),
            Slot::ExtraValue { field } => {
                if let Some(extra) = self.extra.as_mut() {
                    extra.set_field_text(0, field.as_deref(), text);
                }
            }
            Slot::ExtraTime => {
                if let Some(extra) = self.extra.as_mut() {
                    extra.set_time(0, text);
                }
            }
            Slot::Button(_) => return Ok(()),
        }
        self.sync()
    }

    /// Drop local edits
    pub fn revert(&mut self) -> Result<()> {
        self.edited = self.original.clone();
        self.extra = (!self.original.single).then(|| self.original.empty_copy());
        self.sync()
    }
}

fn to_json(constant: &Constant) -> Result<serde_json::Value> {
    serde_json::to_value(constant)
        .with_context(|| format!("Could not serialize constant {}", constant.name))
}

pub struct App {
    pub page: Page,
    pub popup: Popup,
    client: ApiClient,

    // Constants screen
    pub cards: Option<Vec<ConstantCard>>,
    pub selected_card: usize,
    pub selected_slot: usize,
    pub editing: bool,
    pub input_buffer: String,

    // Writes
    pub effects: WriteEffects,
    pub active_write: Option<WriteKey>,
    settle_tx: mpsc::UnboundedSender<(WriteKey, Settlement)>,
    settle_rx: mpsc::UnboundedReceiver<(WriteKey, Settlement)>,

    // Kit statistics screen
    pub kit_lines: Option<Vec<kit::Line>>,
    pub kit_scroll: usize,

    // Error from the last load or write (shown until the next reload)
    pub error_message: Option<String>,

    // Status message (shown in info line, auto-clears after timeout)
    pub status_message: Option<String>,
    pub status_message_time: Option<Instant>,
}

impl App {
    pub async fn new(client: ApiClient, page: Page) -> Result<Self> {
        let (settle_tx, settle_rx) = mpsc::unbounded_channel();

        let mut app = Self {
            page,
            popup: Popup::None,
            client,

            cards: None,
            selected_card: 0,
            selected_slot: 0,
            editing: false,
            input_buffer: String::new(),

            effects: WriteEffects::default(),
            active_write: None,
            settle_tx,
            settle_rx,

            kit_lines: None,
            kit_scroll: 0,

            error_message: None,
            status_message: None,
            status_message_time: None,
        };

        app.refresh().await;
        Ok(app)
    }

    pub fn server(&self) -> &str {
        self.client.base_url()
    }

    /// Set a status message (auto-clears after 3 seconds)
    fn set_status(&mut self, msg: impl Into<String>) {
        self.status_message = Some(msg.into());
        self.status_message_time = Some(Instant::now());
    }

    /// Reload whatever the current page shows
    pub async fn refresh(&mut self) {
        match self.page {
            Page::Constants => self.load_constants().await,
            Page::Kit => self.load_kit().await,
        }
    }

    async fn load_constants(&mut self) {
        self.cards = None;
        match self.client.get_json::<Vec<Constant>>(constants::CONSTANTS_URL).await {
            Ok(list) => {
                let cards = match constants::annotate_all(list)
                    .into_iter()
                    .map(ConstantCard::new)
                    .collect::<Result<Vec<_>>>()
                {
                    Ok(cards) => cards,
                    Err(e) => {
                        tracing::warn!("Failed to prepare constants: {:#}", e);
                        self.error_message = Some(format!("{:#}", e));
                        self.cards = Some(Vec::new());
                        return;
                    }
                };
                tracing::info!("Loaded {} constants", cards.len());
                if self.selected_card >= cards.len() {
                    self.selected_card = cards.len().saturating_sub(1);
                }
                self.selected_slot = 0;
                self.cards = Some(cards);
                self.error_message = None;
            }
            Err(e) => {
                tracing::warn!("Failed to load constants: {:#}", e);
                self.error_message = Some(format!("{:#}", e));
                self.cards = Some(Vec::new());
            }
        }
    }

    async fn load_kit(&mut self) {
        self.kit_lines = None;
        match self.client.get_json::<Vec<Group>>(kit::STATISTICS_URL).await {
            Ok(groups) => {
                self.kit_lines = Some(kit::lines(&groups, kit::today()));
                self.kit_scroll = 0;
                self.error_message = None;
            }
            Err(e) => {
                tracing::warn!("Failed to load kit statistics: {:#}", e);
                self.error_message = Some(format!("{:#}", e));
                self.kit_lines = Some(Vec::new());
            }
        }
    }

    pub fn selected_card(&self) -> Option<&ConstantCard> {
        self.cards.as_ref()?.get(self.selected_card)
    }

    pub fn selected_slot(&self) -> Option<Slot> {
        self.selected_card()?.slots().get(self.selected_slot).cloned()
    }

    /// The write control currently prompting or waiting, if any
    pub fn active_control(&self) -> Option<&ConfirmedWrite<WriteEffects>> {
        let key = self.active_write?;
        self.cards.as_ref()?.get(key.card)?.control(key.button)
    }

    fn control_mut(
        cards: &mut Option<Vec<ConstantCard>>,
        key: WriteKey,
    ) -> Option<&mut ConfirmedWrite<WriteEffects>> {
        cards.as_mut()?.get_mut(key.card)?.control_mut(key.button)
    }

    /// Plain `q` only quits when nothing else wants the keyboard
    pub fn can_quit(&self) -> bool {
        self.popup == Popup::None && !self.editing && self.active_write.is_none()
    }

    /// True while a write is waiting for the server
    pub fn is_waiting(&self) -> bool {
        self.active_control().map(|c| c.state().wait_visible()).unwrap_or(false)
    }

    pub async fn handle_key(&mut self, key: KeyEvent) -> Result<()> {
        // An active write owns the keyboard
        if let Some(state) = self.active_control().map(|c| c.state()) {
            return self.handle_write_key(key, state);
        }

        if self.popup == Popup::Help {
            if matches!(key.code, KeyCode::Esc | KeyCode::Char('?') | KeyCode::Enter | KeyCode::Char('q')) {
                self.popup = Popup::None;
            }
            return Ok(());
        }

        if self.editing {
            return self.handle_edit_key(key);
        }

        self.handle_normal_key(key).await
    }

    fn handle_write_key(&mut self, key: KeyEvent, state: WriteState) -> Result<()> {
        let Some(write_key) = self.active_write else {
            return Ok(());
        };
        match state {
            WriteState::Confirming => match key.code {
                KeyCode::Char('y') | KeyCode::Enter => self.start_write(write_key),
                KeyCode::Char('n') | KeyCode::Esc => {
                    if let Some(control) = Self::control_mut(&mut self.cards, write_key) {
                        control.cancel();
                    }
                    self.active_write = None;
                }
                _ => {}
            },
            // Nothing to do but wait
            WriteState::Waiting => {}
            WriteState::Idle => self.active_write = None,
        }
        Ok(())
    }

    fn handle_edit_key(&mut self, key: KeyEvent) -> Result<()> {
        match key.code {
            KeyCode::Enter => {
                self.editing = false;
                let text = std::mem::take(&mut self.input_buffer);
                if let (Some(slot), Some(card)) = (
                    self.selected_slot(),
                    self.cards.as_mut().and_then(|c| c.get_mut(self.selected_card)),
                ) {
                    card.set_slot_text(&slot, text)?;
                }
            }
            KeyCode::Esc => {
                self.editing = false;
                self.input_buffer.clear();
            }
            KeyCode::Backspace => {
                self.input_buffer.pop();
            }
            KeyCode::Char(c) => self.input_buffer.push(c),
            _ => {}
        }
        Ok(())
    }

    async fn handle_normal_key(&mut self, key: KeyEvent) -> Result<()> {
        match key.code {
            KeyCode::Char('1') => self.switch_page(Page::Constants).await,
            KeyCode::Char('2') => self.switch_page(Page::Kit).await,
            KeyCode::Tab => {
                let next = match self.page {
                    Page::Constants => Page::Kit,
                    Page::Kit => Page::Constants,
                };
                self.switch_page(next).await;
            }
            KeyCode::Char('R') | KeyCode::Char('r') => {
                self.refresh().await;
                self.set_status("Reloaded");
            }
            KeyCode::Char('?') => self.popup = Popup::Help,
            _ => match self.page {
                Page::Constants => return self.handle_constants_key(key),
                Page::Kit => self.handle_kit_key(key),
            },
        }
        Ok(())
    }

    async fn switch_page(&mut self, page: Page) {
        if self.page != page {
            self.page = page;
            self.refresh().await;
        }
    }

    fn handle_constants_key(&mut self, key: KeyEvent) -> Result<()> {
        let Some(cards) = self.cards.as_ref() else {
            return Ok(());
        };
        if cards.is_empty() {
            return Ok(());
        }
        let slot_count = cards[self.selected_card].slots().len();

        match key.code {
            KeyCode::Char('j') | KeyCode::Down => {
                self.selected_card = (self.selected_card + 1) % cards.len();
                self.selected_slot = 0;
            }
            KeyCode::Char('k') | KeyCode::Up => {
                self.selected_card = self.selected_card.checked_sub(1).unwrap_or(cards.len() - 1);
                self.selected_slot = 0;
            }
            KeyCode::Char('l') | KeyCode::Right => {
                self.selected_slot = (self.selected_slot + 1) % slot_count;
            }
            KeyCode::Char('h') | KeyCode::Left | KeyCode::BackTab => {
                self.selected_slot = self.selected_slot.checked_sub(1).unwrap_or(slot_count - 1);
            }
            KeyCode::Char('u') => {
                let reverted = match self.cards.as_mut().and_then(|c| c.get_mut(self.selected_card)) {
                    Some(card) if card.modified() => {
                        card.revert()?;
                        true
                    }
                    _ => false,
                };
                if reverted {
                    self.set_status("Edits reverted");
                }
            }
            KeyCode::Char(' ') | KeyCode::Enter => self.activate_slot(),
            _ => {}
        }
        Ok(())
    }

    fn activate_slot(&mut self) {
        let Some(slot) = self.selected_slot() else {
            return;
        };
        let card_index = self.selected_card;

        match slot {
            Slot::Button(button) => {
                let key = WriteKey {
                    card: card_index,
                    button,
                };
                let Some(control) = Self::control_mut(&mut self.cards, key) else {
                    return;
                };
                if control.trigger() {
                    self.active_write = Some(key);
                } else {
                    let label = control.label().to_string();
                    self.set_status(format!("{} is not available", label));
                }
            }
            slot => {
                if let Some(text) = self.selected_card().map(|card| card.slot_text(&slot)) {
                    self.input_buffer = text;
                    self.editing = true;
                }
            }
        }
    }

    /// Send the confirmed request on a background task
    fn start_write(&mut self, key: WriteKey) {
        let Some(control) = Self::control_mut(&mut self.cards, key) else {
            self.active_write = None;
            return;
        };
        let Some(in_flight) = control.confirm() else {
            return;
        };

        let client = self.client.clone();
        let tx = self.settle_tx.clone();
        tokio::spawn(async move {
            let settlement = in_flight.send(&client).await;
            if tx.send((key, settlement)).is_err() {
                tracing::warn!("UI closed before write settled");
            }
        });
    }

    fn handle_kit_key(&mut self, key: KeyEvent) {
        let len = self.kit_lines.as_ref().map(|l| l.len()).unwrap_or(0);
        match key.code {
            KeyCode::Char('j') | KeyCode::Down => {
                if self.kit_scroll + 1 < len {
                    self.kit_scroll += 1;
                }
            }
            KeyCode::Char('k') | KeyCode::Up => self.kit_scroll = self.kit_scroll.saturating_sub(1),
            KeyCode::PageDown => self.kit_scroll = (self.kit_scroll + 10).min(len.saturating_sub(1)),
            KeyCode::PageUp => self.kit_scroll = self.kit_scroll.saturating_sub(10),
            KeyCode::Home => self.kit_scroll = 0,
            _ => {}
        }
    }

    /// Deliver settled writes and clear stale status messages
    pub async fn tick(&mut self) -> Result<()> {
        if let Some(time) = self.status_message_time {
            if time.elapsed() > STATUS_TIMEOUT {
                self.status_message = None;
                self.status_message_time = None;
            }
        }

        while let Ok((key, settlement)) = self.settle_rx.try_recv() {
            if let Some(control) = Self::control_mut(&mut self.cards, key) {
                control.settle(&mut self.effects, settlement);
            }
            if self.active_write == Some(key) {
                self.active_write = None;
            }
        }

        self.apply_effects().await;
        Ok(())
    }

    async fn apply_effects(&mut self) {
        let effects = std::mem::take(&mut self.effects);

        if let Some(message) = effects.finished {
            self.set_status(message);
        }
        if effects.reload {
            self.load_constants().await;
        }
        // After the reload, which clears errors from loading
        if let Some(error) = effects.error {
            self.error_message = Some(error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::RawResponse;
    use crossterm::event::KeyModifiers;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn card(json: serde_json::Value) -> ConstantCard {
        let list: Vec<Constant> = serde_json::from_value(json!([json])).unwrap();
        ConstantCard::new(constants::annotate_all(list).remove(0)).unwrap()
    }

    fn dated() -> ConstantCard {
        card(json!({
            "name": "FTHR.Bike", "description": "", "single": false,
            "values": [{"value": "154", "time": "2020-04-01 00:00:00", "statistic": 1}]
        }))
    }

    #[test]
    fn test_new_card_buttons() {
        let card = dated();
        assert!(card.save.is_disabled());
        assert!(!card.delete.is_disabled());
        assert!(card.add.as_ref().unwrap().is_disabled());
        assert_eq!(
            card.delete.request().json,
            Some(json!("FTHR.Bike"))
        );
    }

    #[test]
    fn test_edit_enables_save_and_disables_delete() {
        let mut card = dated();
        card.set_slot_text(&Slot::Value { entry: 0, field: None }, "160".to_string()).unwrap();
        assert!(card.modified());
        assert!(!card.save.is_disabled());
        assert!(card.delete.is_disabled());
        assert_eq!(card.save.request().json.as_ref().unwrap()["values"][0]["value"], json!("160"));

        card.revert().unwrap();
        assert!(!card.modified());
        assert!(card.save.is_disabled());
    }

    #[test]
    fn test_extra_value_enables_add() {
        let mut card = dated();
        card.set_slot_text(&Slot::ExtraValue { field: None }, "165".to_string()).unwrap();
        let add = card.add.as_ref().unwrap();
        assert!(!add.is_disabled());
        assert_eq!(add.request().json.as_ref().unwrap()["values"][0]["value"], json!("165"));
        assert_eq!(add.layout(), (Some(EDIT_WIDTH), BTN_WIDTH));
    }

    #[test]
    fn test_slots_for_undated_composite() {
        let card = card(json!({
            "name": "Power.Bike", "single": true,
            "values": [{"value": {"bike": "road", "weight": 8}, "statistic": 1}]
        }));
        assert!(card.add.is_none());
        assert_eq!(
            card.slots(),
            vec![
                Slot::Value { entry: 0, field: Some("bike".into()) },
                Slot::Value { entry: 0, field: Some("weight".into()) },
                Slot::Button(Button::Delete),
                Slot::Button(Button::Save),
            ]
        );
    }

    #[test]
    fn test_disabled_button_cannot_trigger() {
        let mut card = dated();
        assert!(!card.save.trigger());
        assert_eq!(card.save.state(), WriteState::Idle);
    }

    #[test]
    fn test_delete_is_destructive() {
        let card = dated();
        assert!(card.delete.is_destructive());
        assert_eq!(card.delete.style(), Variant::Text);
        assert!(!card.save.is_destructive());
        assert_eq!(card.save.style(), Variant::Contained);
    }

    fn press(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    async fn serve_constants(server: &MockServer, loads: u64) {
        Mock::given(method("GET"))
            .and(path(constants::CONSTANTS_URL))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
                "name": "FTHR.Bike", "description": "", "single": false,
                "values": [{"value": "154", "time": "2020-04-01 00:00:00", "statistic": 1}]
            }])))
            .expect(loads)
            .mount(server)
            .await;
    }

    async fn app_for(server: &MockServer) -> App {
        let client = ApiClient::new(&server.uri(), None, Duration::from_secs(5)).unwrap();
        App::new(client, Page::Constants).await.unwrap()
    }

    /// Tick until the active write settles
    async fn wait_for_settle(app: &mut App) {
        for _ in 0..500 {
            app.tick().await.unwrap();
            if app.active_write.is_none() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("write never settled");
    }

    async fn keys(app: &mut App, codes: &[KeyCode]) {
        for code in codes {
            app.handle_key(press(*code)).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_save_settles_and_reloads() {
        let server = MockServer::start().await;
        serve_constants(&server, 2).await;
        Mock::given(method("PUT"))
            .and(path(CONSTANT_URL))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .expect(1)
            .mount(&server)
            .await;

        let mut app = app_for(&server).await;
        assert_eq!(app.cards.as_ref().map(Vec::len), Some(1));

        // Edit the value 154 -> 159
        keys(&mut app, &[KeyCode::Enter, KeyCode::Backspace, KeyCode::Char('9'), KeyCode::Enter]).await;
        assert!(app.selected_card().unwrap().modified());

        // Value, Time, Delete, Save
        keys(&mut app, &[KeyCode::Right, KeyCode::Right, KeyCode::Right, KeyCode::Enter]).await;
        assert_eq!(app.active_write, Some(WriteKey { card: 0, button: Button::Save }));
        assert_eq!(app.active_control().unwrap().state(), WriteState::Confirming);
        assert!(!app.can_quit());

        keys(&mut app, &[KeyCode::Char('y')]).await;
        assert!(app.is_waiting());

        // Keys are swallowed while waiting
        keys(&mut app, &[KeyCode::Char('y')]).await;

        wait_for_settle(&mut app).await;
        assert_eq!(app.error_message, None);
        assert_eq!(app.status_message.as_deref(), Some("Save complete"));
        // Reloaded from the server, so the edit is gone
        assert!(!app.selected_card().unwrap().modified());
        assert_eq!(app.selected_card().unwrap().save.state(), WriteState::Idle);

        let requests = server.received_requests().await.unwrap();
        let put = requests.iter().find(|r| r.url.path() == CONSTANT_URL).unwrap();
        let sent: serde_json::Value = serde_json::from_slice(&put.body).unwrap();
        assert_eq!(sent["name"], json!("FTHR.Bike"));
        assert_eq!(sent["values"][0]["value"], json!("159"));
    }

    #[tokio::test]
    async fn test_failed_delete_reports_error_without_reload() {
        let server = MockServer::start().await;
        serve_constants(&server, 1).await;
        Mock::given(method("PUT"))
            .and(path(DELETE_CONSTANT_URL))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({"error": "in use"})))
            .expect(1)
            .mount(&server)
            .await;

        let mut app = app_for(&server).await;
        keys(&mut app, &[KeyCode::Right, KeyCode::Right, KeyCode::Enter, KeyCode::Enter]).await;
        assert!(app.is_waiting());

        wait_for_settle(&mut app).await;
        assert_eq!(app.error_message.as_deref(), Some("HTTP 500: in use"));
        assert_eq!(app.status_message.as_deref(), Some("Delete complete"));
        assert_eq!(app.selected_card().unwrap().delete.state(), WriteState::Idle);
        assert!(app.can_quit());
    }

    #[tokio::test]
    async fn test_cancelled_write_sends_nothing() {
        let server = MockServer::start().await;
        serve_constants(&server, 1).await;

        let mut app = app_for(&server).await;
        keys(&mut app, &[KeyCode::Right, KeyCode::Right, KeyCode::Enter, KeyCode::Esc]).await;
        assert_eq!(app.active_write, None);
        assert_eq!(app.selected_card().unwrap().delete.state(), WriteState::Idle);

        let requests = server.received_requests().await.unwrap();
        assert!(requests.iter().all(|r| r.url.path() == constants::CONSTANTS_URL));
    }

    #[tokio::test]
    async fn test_settlement_for_missing_card_is_dropped() {
        let server = MockServer::start().await;
        serve_constants(&server, 1).await;
        let mut app = app_for(&server).await;

        let mut stray = write_control(Button::Save, "", WriteRequest::new(CONSTANT_URL));
        assert!(stray.trigger());
        let settlement = stray
            .confirm()
            .unwrap()
            .settle_with(Ok(RawResponse::new(200, b"{}".to_vec())));

        let key = WriteKey { card: 7, button: Button::Save };
        app.active_write = Some(key);
        app.settle_tx.send((key, settlement)).unwrap();

        app.tick().await.unwrap();
        assert_eq!(app.active_write, None);
        assert_eq!(app.status_message, None);
        assert_eq!(app.error_message, None);
    }
}
