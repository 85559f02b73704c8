use anyhow::Result;
use comfy_table::{Attribute, Cell, Color, ContentArrangement, Table};
use iotap_core::ProbeStatus;

pub struct TermPrinted;

pub trait TermPrintable {
    fn term_print(&self) -> Result<TermPrinted>;
}

impl TermPrintable for String {
    fn term_print(&self) -> Result<TermPrinted> {
        println!("{self}");
        Ok(TermPrinted)
    }
}

/// A list of pids with a header naming its table.
pub struct PidList {
    header: &'static str,
    pids: Vec<u32>,
}

impl PidList {
    pub fn targets(pids: Vec<u32>) -> Self {
        Self {
            header: "TARGET PID",
            pids,
        }
    }

    pub fn exclusions(pids: Vec<u32>) -> Self {
        Self {
            header: "EXCLUDED PID",
            pids,
        }
    }

    fn table(&self) -> Table {
        let mut table = table();
        table.set_header(vec![Cell::new(self.header).add_attribute(Attribute::Bold)]);

        let mut sorted = self.pids.clone();
        sorted.sort_unstable();
        for pid in sorted {
            table.add_row(vec![Cell::new(pid).fg(Color::Cyan)]);
        }
        table
    }
}

impl TermPrintable for PidList {
    fn term_print(&self) -> Result<TermPrinted> {
        if self.pids.is_empty() {
            return "None".to_string().term_print();
        }
        println!("{}", self.table());
        Ok(TermPrinted)
    }
}

fn status_table(status: &ProbeStatus) -> Table {
    let mut table = table();

    table.set_header(vec![
        Cell::new("KEY").add_attribute(Attribute::Bold),
        Cell::new("VALUE").add_attribute(Attribute::Bold),
    ]);

    let broadcast = if status.broadcast {
        Cell::new("enabled").fg(Color::Green)
    } else {
        Cell::new("disabled").fg(Color::Yellow)
    };
    let dropped_color = if status.lost > 0 || status.kernel_dropped > 0 {
        Color::Red
    } else {
        Color::White
    };

    let rows = [
        ("broadcast", broadcast.add_attribute(Attribute::Bold)),
        ("targets", Cell::new(pid_cell(&status.targets))),
        ("exclusions", Cell::new(pid_cell(&status.exclusions))),
        ("received", Cell::new(status.received)),
        ("lost", Cell::new(status.lost).fg(dropped_color)),
        (
            "kernel dropped",
            Cell::new(status.kernel_dropped).fg(dropped_color),
        ),
    ];
    for (key, value) in rows {
        table.add_row(vec![
            Cell::new(key).fg(Color::Cyan).add_attribute(Attribute::Bold),
            value,
        ]);
    }
    table
}

impl TermPrintable for ProbeStatus {
    fn term_print(&self) -> Result<TermPrinted> {
        println!("{}", status_table(self));
        Ok(TermPrinted)
    }
}

fn pid_cell(pids: &[u32]) -> String {
    if pids.is_empty() {
        return "-".to_string();
    }
    pids.iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

fn table() -> Table {
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);

    table
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(mut table: Table) -> String {
        table.force_no_tty();
        table.to_string()
    }

    #[test]
    fn pid_lists_are_sorted() {
        let rendered = render(PidList::targets(vec![30, 4, 200]).table());
        assert!(rendered.contains("TARGET PID"));
        let position = |pid: &str| rendered.find(pid).unwrap();
        assert!(position(" 4 ") < position(" 30 "));
        assert!(position(" 30 ") < position(" 200 "));
    }

    #[test]
    fn status() {
        let status = ProbeStatus {
            broadcast: true,
            targets: vec![],
            exclusions: vec![1, 2],
            received: 10,
            lost: 0,
            kernel_dropped: 3,
        };
        let rendered = render(status_table(&status));
        assert!(rendered.contains("enabled"));
        assert!(rendered.contains("1, 2"));
        assert!(rendered.contains("kernel dropped"));
    }

    #[test]
    fn empty_pid_cell() {
        assert_eq!(pid_cell(&[]), "-");
        assert_eq!(pid_cell(&[5]), "5");
    }
}
