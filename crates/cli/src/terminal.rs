use std::io::{self, Write};

use anyhow::Result;
use crossterm::{
    cursor::MoveTo,
    execute,
    style::{Color, Print, ResetColor, SetForegroundColor},
    terminal::{Clear, ClearType},
};

/// Color scheme for terminal output.
pub struct Colors;

impl Colors {
    pub const HEADER: Color = Color::Magenta;
    pub const DIM: Color = Color::DarkGrey;
    pub const OK: Color = Color::Green;
    pub const ACTIVE: Color = Color::Cyan;
    pub const ERROR: Color = Color::Red;
}

/// A plain text table with columns sized to their widest cell.
#[derive(Debug, Clone, Default)]
pub struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new<I, S>(headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            headers: headers.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    /// Append a row. Missing cells render empty.
    pub fn push_row(&mut self, row: Vec<String>) {
        self.rows.push(row);
    }

    fn widths(&self) -> Vec<usize> {
        let mut widths: Vec<usize> = self.headers.iter().map(|h| h.chars().count()).collect();
        for row in &self.rows {
            for (i, cell) in row.iter().enumerate() {
                let len = cell.chars().count();
                match widths.get_mut(i) {
                    Some(w) => *w = (*w).max(len),
                    None => widths.push(len),
                }
            }
        }
        widths
    }

    pub fn render(&self) -> String {
        let widths = self.widths();
        let border: String = widths
            .iter()
            .map(|w| "-".repeat(w + 2))
            .fold(String::from("+"), |acc, seg| acc + &seg + "+");

        let line = |cells: &[String]| {
            let mut out = String::from("|");
            for (i, &w) in widths.iter().enumerate() {
                let cell = cells.get(i).map(String::as_str).unwrap_or("");
                out.push_str(&format!(" {cell:<w$} |"));
            }
            out
        };

        let mut out = vec![border.clone(), line(&self.headers), border.clone()];
        out.extend(self.rows.iter().map(|row| line(row)));
        out.push(border);
        out.join("\n") + "\n"
    }
}

/// Console output for progress screens.
pub struct Terminal;

impl Terminal {
    pub fn clear(&self) -> Result<()> {
        let mut stdout = io::stdout();
        execute!(stdout, Clear(ClearType::All), MoveTo(0, 0))?;
        Ok(())
    }

    pub fn print_header(&self, text: &str) -> Result<()> {
        self.print_colored(Colors::HEADER, text)
    }

    pub fn print_info(&self, text: &str) -> Result<()> {
        self.print_colored(Colors::DIM, text)
    }

    pub fn print_error(&self, text: &str) -> Result<()> {
        self.print_colored(Colors::ERROR, &format!("Error: {text}"))
    }

    pub fn print_colored(&self, color: Color, text: &str) -> Result<()> {
        let mut stdout = io::stdout();
        execute!(
            stdout,
            SetForegroundColor(color),
            Print(format!("{text}\n")),
            ResetColor,
        )?;
        stdout.flush()?;
        Ok(())
    }

    pub fn print_table(&self, table: &Table) -> Result<()> {
        let mut stdout = io::stdout();
        execute!(stdout, Print(table.render()))?;
        stdout.flush()?;
        Ok(())
    }
}
