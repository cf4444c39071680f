use std::io::Stdout;
use std::time::Duration;

use anyhow::{Context, Result};
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    symbols::Marker,
    text::{Line, Span},
    widgets::{
        canvas::{Canvas, Circle, Line as CanvasLine},
        Axis, Bar, BarChart, BarGroup, Block, Borders, Chart, Dataset, GraphType, Paragraph,
    },
    Frame as TermFrame, Terminal,
};

use crate::refresh::{Frame, Renderer, UiCommand, BAR_STEP_PERCENT};
use crate::trace::{TracePoint, WINDOW_SECONDS};

const THROTTLE_COLOR: Color = Color::Green;
const BRAKE_COLOR: Color = Color::LightRed;
const STEER_COLOR: Color = Color::Cyan;
const CLUTCH_COLOR: Color = Color::Blue;

/// Full-screen terminal overlay. Restores the terminal on close or drop.
pub struct TerminalOverlay {
    terminal: Terminal<CrosstermBackend<Stdout>>,
    closed: bool,
}

impl TerminalOverlay {
    pub fn new() -> Result<Self> {
        enable_raw_mode().context("Enabling raw terminal mode")?;
        let mut stdout = std::io::stdout();
        execute!(stdout, EnterAlternateScreen).context("Entering alternate screen")?;
        let backend = CrosstermBackend::new(stdout);
        let terminal = Terminal::new(backend).context("Creating terminal")?;
        Ok(Self { terminal, closed: false })
    }

    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        disable_raw_mode()?;
        execute!(self.terminal.backend_mut(), LeaveAlternateScreen)?;
        self.terminal.show_cursor()?;
        Ok(())
    }
}

impl Drop for TerminalOverlay {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl Renderer for TerminalOverlay {
    fn render(&mut self, frame: &Frame) -> Result<()> {
        self.terminal.draw(|f| draw(f, frame))?;
        Ok(())
    }

    fn pump(&mut self, budget: Duration) -> Result<Vec<UiCommand>> {
        let mut commands = Vec::new();
        if !event::poll(budget)? {
            return Ok(commands);
        }
        loop {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    commands.extend(command_for_key(key));
                }
            }
            if !event::poll(Duration::ZERO)? {
                break;
            }
        }
        Ok(commands)
    }
}

pub(crate) fn command_for_key(key: KeyEvent) -> Option<UiCommand> {
    match key.code {
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => Some(UiCommand::Quit),
        KeyCode::Char('q') | KeyCode::Esc => Some(UiCommand::Quit),
        KeyCode::Char('+') | KeyCode::Char('=') => Some(UiCommand::AdjustBarSmoothing(BAR_STEP_PERCENT)),
        KeyCode::Char('-') => Some(UiCommand::AdjustBarSmoothing(-BAR_STEP_PERCENT)),
        KeyCode::Char(']') => Some(UiCommand::AdjustSteeringRange(1)),
        KeyCode::Char('[') => Some(UiCommand::AdjustSteeringRange(-1)),
        KeyCode::Char('c') => Some(UiCommand::ClearTrace),
        _ => None,
    }
}

pub(crate) fn draw(f: &mut TermFrame, frame: &Frame) {
    let outer = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1), // status
            Constraint::Min(0),    // main
            Constraint::Length(1), // keys
        ])
        .split(f.size());

    let status = if frame.connected {
        Span::styled("Connected", Style::default().fg(Color::Green).add_modifier(Modifier::BOLD))
    } else {
        Span::styled("Not connected", Style::default().fg(Color::Red).add_modifier(Modifier::BOLD))
    };
    let header = Paragraph::new(Line::from(vec![
        Span::raw("inputscope | "),
        status,
        Span::raw(format!(
            " | bars {}% | range {:.0}°",
            frame.bar_smoothing_percent, frame.steering_range_deg
        )),
    ]));
    f.render_widget(header, outer[0]);

    let main = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Length(38), // bars
            Constraint::Length(26), // wheel, gear, speed
            Constraint::Min(20),    // trace
        ])
        .split(outer[1]);

    draw_bars(f, main[0], frame);
    draw_wheel(f, main[1], frame);
    draw_trace(f, main[2], &frame.trace);

    let footer = Paragraph::new("q: quit | +/-: bar responsiveness | [/]: steering range | c: clear trace");
    f.render_widget(footer, outer[2]);
}

fn bar(label: &'static str, value: f64, color: Color) -> Bar<'static> {
    let v = value.round() as u64;
    Bar::default()
        .label(label.into())
        .value(v)
        .text_value(format!("{v}"))
        .style(Style::default().fg(color))
}

fn draw_bars(f: &mut TermFrame, area: Rect, frame: &Frame) {
    let b = frame.bars;
    let group = BarGroup::default().bars(&[
        bar("CLU", b.clutch, CLUTCH_COLOR),
        bar("BRK", b.brake, BRAKE_COLOR),
        bar("THR", b.throttle, THROTTLE_COLOR),
        bar("STR", b.steering, STEER_COLOR),
    ]);
    let chart = BarChart::default()
        .block(Block::default().title("Inputs").borders(Borders::ALL))
        .bar_width(6)
        .bar_gap(2)
        .max(100)
        .data(group);
    f.render_widget(chart, area);
}

/// Tip of the wheel's top spoke on a unit circle, clockwise-positive.
pub(crate) fn wheel_spoke(angle_deg: f64) -> (f64, f64) {
    let a = angle_deg.to_radians();
    (a.sin(), a.cos())
}

fn draw_wheel(f: &mut TermFrame, area: Rect, frame: &Frame) {
    let parts = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(6), Constraint::Length(4)])
        .split(area);

    let (x, y) = wheel_spoke(frame.wheel_angle_deg);
    let wheel = Canvas::default()
        .block(Block::default().title(format!("Wheel {:+.0}°", frame.wheel_angle_deg)).borders(Borders::ALL))
        .marker(Marker::Braille)
        .x_bounds([-1.2, 1.2])
        .y_bounds([-1.2, 1.2])
        .paint(move |ctx| {
            ctx.draw(&Circle { x: 0.0, y: 0.0, radius: 1.0, color: Color::White });
            ctx.draw(&CanvasLine { x1: 0.0, y1: 0.0, x2: x, y2: y, color: STEER_COLOR });
            ctx.draw(&CanvasLine { x1: -y * 0.4, y1: x * 0.4, x2: y * 0.4, y2: -x * 0.4, color: Color::Gray });
        });
    f.render_widget(wheel, parts[0]);

    let readout = Paragraph::new(vec![
        Line::from(Span::styled(frame.gear.clone(), Style::default().add_modifier(Modifier::BOLD))),
        Line::from(format!("{} {}", frame.speed, frame.speed_unit.label())),
    ])
    .alignment(Alignment::Center)
    .block(Block::default().borders(Borders::ALL));
    f.render_widget(readout, parts[1]);
}

/// Plot series for the trace chart, all on a 0..100 axis (steer centered on
/// 50), plus the x bounds of the visible window.
pub(crate) fn trace_series(points: &[TracePoint]) -> ([Vec<(f64, f64)>; 3], [f64; 2]) {
    let t_max = points.last().map(|p| p.t).unwrap_or(WINDOW_SECONDS);
    let bounds = [t_max - WINDOW_SECONDS, t_max];
    let throttle = points.iter().map(|p| (p.t, p.throttle)).collect();
    let brake = points.iter().map(|p| (p.t, p.brake)).collect();
    let steer = points.iter().map(|p| (p.t, (p.steer + 100.0) / 2.0)).collect();
    ([throttle, brake, steer], bounds)
}

fn series<'a>(name: &'static str, color: Color, data: &'a [(f64, f64)]) -> Dataset<'a> {
    Dataset::default()
        .name(name)
        .marker(Marker::Braille)
        .graph_type(GraphType::Line)
        .style(Style::default().fg(color))
        .data(data)
}

/// Flat line at the steering zero across the visible window.
pub(crate) fn centre_line(bounds: [f64; 2]) -> [(f64, f64); 2] {
    [(bounds[0], 50.0), (bounds[1], 50.0)]
}

fn draw_trace(f: &mut TermFrame, area: Rect, points: &[TracePoint]) {
    let ([throttle, brake, steer], bounds) = trace_series(points);
    let centre = centre_line(bounds);
    let datasets = vec![
        Dataset::default()
            .marker(Marker::Braille)
            .graph_type(GraphType::Line)
            .style(Style::default().fg(Color::DarkGray))
            .data(&centre),
        series("Steering", STEER_COLOR, &steer),
        series("Brake", BRAKE_COLOR, &brake),
        series("Throttle", THROTTLE_COLOR, &throttle),
    ];
    let chart = Chart::new(datasets)
        .block(Block::default().title("Trace").borders(Borders::ALL))
        .x_axis(Axis::default().bounds(bounds))
        .y_axis(
            Axis::default()
                .bounds([0.0, 100.0])
                .labels(["0", "25", "50", "75", "100"].into_iter().map(Span::raw).collect()),
        );
    f.render_widget(chart, area);
}
