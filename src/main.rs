mod config;
mod controller;
mod gemini;
mod history;
mod markdown;
mod transcript;

use iced::{
    widget::{
        button, container, horizontal_space, scrollable, text, text_input, Column, Row,
        text_input::Id,
    },
    Element, Length, Task, Theme, Font, Subscription, Color, Border,
    time, clipboard,
    keyboard::{self, Key},
    event::{self, Event as IcedEvent},
    alignment, Padding,
    window,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use controller::{ChatController, ChatMessage};
use gemini::{ApiError, Completion, GeminiClient};
use markdown::{CodeBlock, Segment};
use transcript::{BlockRef, Transcript, COPY_FEEDBACK};

const TITLE: &str = "Gemini Chat";

fn init_logging() {
    let filter = EnvFilter::try_from_env("GEM_CHAT_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> iced::Result {
    init_logging();
    let config = config::Config::load();
    let size = iced::Size::new(config.window.width as f32, config.window.height as f32);

    iced::application(TITLE, App::update, App::view)
        .theme(App::theme)
        .subscription(App::subscription)
        .window(window::Settings {
            size,
            position: window::Position::Centered,
            ..Default::default()
        })
        .run_with(move || App::new(config))
}

#[derive(Debug, Clone)]
enum Message {
    InputChanged(String),
    Submit,
    ReplyReceived(u64, Result<String, ApiError>),
    NewChat,
    CopyCode(BlockRef),
    CopyExpired(BlockRef, u64),
    Tick,
    Exit,
}

struct App {
    controller: ChatController<GeminiClient, Transcript>,
    copy_label: String,
    copied_label: String,
    thinking_label: String,
    loading_frame: usize,
    input_id: Id,
    scroll_id: scrollable::Id,
}

impl App {
    fn new(config: config::Config) -> (Self, Task<Message>) {
        let client = GeminiClient::from_config(&config.gemini, config.generation.clone());
        info!(model = client.get_model(), "starting {}", TITLE);

        let controller = ChatController::new(Arc::new(client), Transcript::new(), &config.chat);
        let input_id = Id::unique();

        let app = App {
            controller,
            copy_label: config.chat.copy_label,
            copied_label: config.chat.copied_label,
            thinking_label: config.chat.thinking_label,
            loading_frame: 0,
            input_id: input_id.clone(),
            scroll_id: scrollable::Id::unique(),
        };

        (app, text_input::focus(input_id))
    }

    fn snap_to_end(&self) -> Task<Message> {
        scrollable::snap_to(self.scroll_id.clone(), scrollable::RelativeOffset::END)
    }

    fn update(&mut self, message: Message) -> Task<Message> {
        match message {
            Message::InputChanged(value) => {
                self.controller.view_mut().set_input(value);
                Task::none()
            }
            Message::Submit => {
                let input = self.controller.view().input().to_string();
                let Some(pending) = self.controller.begin(&input) else {
                    return Task::none();
                };

                self.loading_frame = 0;
                let epoch = pending.epoch;
                let client = self.controller.client();

                let request = Task::perform(
                    async move { client.complete(&pending.history).await },
                    move |result| Message::ReplyReceived(epoch, result),
                );

                Task::batch([request, self.snap_to_end()])
            }
            Message::ReplyReceived(epoch, result) => {
                self.controller.finish(epoch, result);
                self.snap_to_end()
            }
            Message::NewChat => {
                self.controller.reset();
                self.loading_frame = 0;
                text_input::focus(self.input_id.clone())
            }
            Message::CopyCode(block) => {
                let Some(code) = self.controller.view().code_for(block).map(str::to_string) else {
                    return Task::none();
                };
                let Some(token) = self.controller.view_mut().mark_copied(block) else {
                    return Task::none();
                };

                let expire = Task::perform(tokio::time::sleep(COPY_FEEDBACK), move |_| {
                    Message::CopyExpired(block, token)
                });

                Task::batch([clipboard::write(code), expire])
            }
            Message::CopyExpired(block, token) => {
                self.controller.view_mut().clear_copied(block, token);
                Task::none()
            }
            Message::Tick => {
                if self.controller.is_busy() {
                    self.loading_frame = (self.loading_frame + 1) % 10;
                }
                Task::none()
            }
            Message::Exit => {
                iced::exit()
            }
        }
    }

    fn subscription(&self) -> Subscription<Message> {
        let timer = if self.controller.is_busy() {
            time::every(Duration::from_millis(80)).map(|_| Message::Tick)
        } else {
            Subscription::none()
        };

        let events = event::listen_with(|event, _status, _id| {
            if let IcedEvent::Keyboard(keyboard::Event::KeyPressed {
                key: Key::Named(keyboard::key::Named::Escape),
                ..
            }) = event
            {
                Some(Message::Exit)
            } else {
                None
            }
        });

        Subscription::batch([timer, events])
    }

    fn view_code_block<'a>(&'a self, block_ref: BlockRef, block: &'a CodeBlock) -> Element<'a, Message> {
        let label = if self.controller.view().is_copied(block_ref) {
            &self.copied_label
        } else {
            &self.copy_label
        };

        let header = Row::new()
            .push(text(block.language_tag()).size(12))
            .push(horizontal_space())
            .push(
                button(text(label.as_str()).size(12))
                    .on_press(Message::CopyCode(block_ref))
                    .padding(Padding::from([2, 8])),
            )
            .align_y(alignment::Vertical::Center);

        let lines: Vec<Element<'a, Message>> = block
            .lines
            .iter()
            .map(|line| {
                if line.spans.is_empty() {
                    return Element::from(text(" ").size(13));
                }
                let spans: Vec<Element<'a, Message>> = line
                    .spans
                    .iter()
                    .map(|span| {
                        let [r, g, b] = span.color;
                        Element::from(
                            text(span.text.trim_end_matches(['\n', '\r']))
                                .font(Font::MONOSPACE)
                                .size(13)
                                .color(Color::from_rgb8(r, g, b)),
                        )
                    })
                    .collect();
                Element::from(Row::with_children(spans))
            })
            .collect();

        container(Column::new().push(header).push(Column::with_children(lines)).spacing(6))
            .padding(10)
            .width(Length::Fill)
            .style(|_theme: &Theme| container::Style {
                background: Some(Color::from_rgb8(0x2b, 0x30, 0x3b).into()),
                border: Border {
                    radius: 6.0.into(),
                    ..Default::default()
                },
                ..Default::default()
            })
            .into()
    }

    fn view_message<'a>(&'a self, index: usize, message: &'a ChatMessage) -> Element<'a, Message> {
        match message {
            ChatMessage::User(body) => container(
                container(text(body.as_str()).size(15))
                    .padding(10)
                    .style(container::rounded_box),
            )
            .width(Length::Fill)
            .align_x(alignment::Horizontal::Right)
            .into(),
            ChatMessage::Bot { reply, .. } => {
                let parts = reply.segments.iter().filter_map(|segment| match segment {
                    Segment::Prose(prose) => Some(Element::from(text(prose.as_str()).size(15))),
                    Segment::Code(block) => reply.code_blocks.get(*block).map(|code| {
                        self.view_code_block(BlockRef { message: index, block: *block }, code)
                    }),
                });

                container(Column::with_children(parts).spacing(10))
                    .padding(10)
                    .width(Length::Fill)
                    .into()
            }
        }
    }

    fn view_thinking(&self) -> Element<'_, Message> {
        let loading_frames = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];
        let spinner_idx = self.loading_frame % loading_frames.len();

        Row::new()
            .push(text(loading_frames[spinner_idx]).size(20))
            .push(text(self.thinking_label.as_str()).size(15))
            .spacing(10)
            .align_y(alignment::Vertical::Center)
            .into()
    }

    fn view(&self) -> Element<'_, Message> {
        let transcript = self.controller.view();

        let header = button(text(TITLE).size(20))
            .on_press(Message::NewChat)
            .style(button::text)
            .padding(Padding::from([5, 10]));

        let body: Element<Message> = if transcript.has_messages() {
            let mut list = Column::with_children(
                transcript
                    .messages()
                    .iter()
                    .enumerate()
                    .map(|(index, message)| self.view_message(index, message)),
            )
            .spacing(12)
            .padding(15);

            if transcript.is_thinking() {
                list = list.push(self.view_thinking());
            }

            scrollable(list)
                .id(self.scroll_id.clone())
                .height(Length::Fill)
                .into()
        } else {
            container(text("Ask me anything to get started.").size(18))
                .width(Length::Fill)
                .height(Length::Fill)
                .align_x(alignment::Horizontal::Center)
                .align_y(alignment::Vertical::Center)
                .into()
        };

        let input = text_input("Type your message...", transcript.input())
            .on_input(Message::InputChanged)
            .on_submit(Message::Submit)
            .padding(15)
            .size(18)
            .id(self.input_id.clone());

        let send = button(text("Send").size(16))
            .on_press_maybe((!self.controller.is_busy()).then_some(Message::Submit))
            .padding(15);

        let input_row = Row::new().push(input).push(send).spacing(10);

        container(
            Column::new()
                .push(header)
                .push(body)
                .push(input_row)
                .spacing(10)
                .padding(10),
        )
        .width(Length::Fill)
        .height(Length::Fill)
        .into()
    }

    fn theme(&self) -> Theme {
        Theme::TokyoNight
    }
}
