//! Bulletin rendering: one student plus an ordered list of grade rows
//! laid out into the fixed A4 report card. Pure function of its inputs;
//! the issue date is injected so output is byte-deterministic.

use chrono::NaiveDate;

use crate::eval::{self, Evaluation, GradeStatus};
use crate::pdf::{Color, Document, Font, Page, PAGE_HEIGHT, PAGE_WIDTH};

pub const BULLETIN_CONTENT_TYPE: &str = "application/pdf";

const INSTITUTION_BADGE: &str = "SENAI";
const INSTITUTION_NAME: &str = "SENAI Morvan Figueiredo";
const DOCUMENT_TITLE: &str = "SCHOOL BULLETIN";
const SYSTEM_LINE: &str = "Academic Assessment System";

const MARGIN_X: f64 = 56.7;
const MARGIN_TOP: f64 = 42.5;
const MARGIN_BOTTOM: f64 = 42.5;

const HEADER_ROW_H: f64 = 18.0;
const DATA_ROW_H: f64 = 16.0;

// Relative column widths carried over from the original layout.
const COLUMN_UNITS: [f64; 8] = [2.2, 1.2, 0.6, 0.6, 0.6, 0.7, 0.9, 0.8];
const COLUMN_TITLES: [&str; 8] = [
    "Subject",
    "Teacher",
    "Score 1",
    "Score 2",
    "Score 3",
    "Final",
    "Absences (%)",
    "Status",
];

#[derive(Debug, Clone)]
pub struct BulletinStudent {
    pub name: String,
    pub registration_number: String,
    pub course: String,
}

#[derive(Debug, Clone)]
pub struct BulletinSubject {
    pub name: String,
    pub teacher_name: Option<String>,
    pub workload: i64,
}

#[derive(Debug, Clone)]
pub struct BulletinGrade {
    pub grade_1: Option<f64>,
    pub grade_2: Option<f64>,
    pub grade_3: Option<f64>,
    pub absences: i64,
    pub subject: BulletinSubject,
}

impl BulletinGrade {
    pub fn evaluate(&self) -> Evaluation {
        eval::evaluate(
            [self.grade_1, self.grade_2, self.grade_3],
            self.absences,
            self.subject.workload,
        )
    }
}

pub fn suggested_file_name(student: &BulletinStudent) -> String {
    format!(
        "bulletin_{}_{}.pdf",
        student.registration_number,
        student.name.replace(' ', "_")
    )
}

/// Status column text: "Pending", "Approved", or "Failed" with the
/// failing reason tags.
pub fn status_label(evaluation: &Evaluation) -> String {
    match evaluation.status {
        GradeStatus::Pending => "Pending".to_string(),
        GradeStatus::Approved => "Approved".to_string(),
        GradeStatus::Failed => {
            let reasons: Vec<&str> = evaluation
                .failure_reasons
                .iter()
                .map(|r| r.short_label())
                .collect();
            format!("Failed ({})", reasons.join(", "))
        }
    }
}

fn fmt_score(score: Option<f64>) -> String {
    match score {
        Some(v) => format!("{:.1}", v),
        None => "-".to_string(),
    }
}

fn red() -> Color {
    Color::from_rgb8(0xFF, 0x00, 0x00)
}

fn grid_grey() -> Color {
    Color::from_rgb8(0xCC, 0xCC, 0xCC)
}

fn stripe_grey() -> Color {
    Color::from_rgb8(0xF8, 0xF8, 0xF8)
}

fn approved_green() -> Color {
    Color::from_rgb8(0xD9, 0xEF, 0xD9)
}

fn column_widths() -> [f64; 8] {
    let usable = PAGE_WIDTH - 2.0 * MARGIN_X;
    let total: f64 = COLUMN_UNITS.iter().sum();
    let mut widths = [0.0; 8];
    for (w, u) in widths.iter_mut().zip(COLUMN_UNITS) {
        *w = usable / total * u;
    }
    widths
}

/// Paints one table row (fill, cell borders, cell text) with its top
/// edge at `top`. Columns 0 and 1 are left-aligned, the rest centered.
fn draw_table_row(page: &mut Page, top: f64, height: f64, cells: &[String; 8], fill: Color, header: bool) {
    let widths = column_widths();
    let (font, size, text_color) = if header {
        (Font::HelveticaBold, 8.0, Color::WHITE)
    } else {
        (Font::Helvetica, 7.5, Color::BLACK)
    };
    let baseline = top - height + (height - size) / 2.0 + 1.5;

    let mut x = MARGIN_X;
    for (i, (cell, width)) in cells.iter().zip(widths).enumerate() {
        page.fill_rect(x, top - height, width, height, fill);
        page.stroke_rect(x, top - height, width, height, Color::BLACK, 0.5);
        if !header && i < 2 {
            page.text(x + 4.0, baseline, font, size, text_color, cell);
        } else {
            page.text_centered(x + width / 2.0, baseline, font, size, text_color, cell);
        }
        x += width;
    }
}

fn draw_header_block(page: &mut Page, issue_date: NaiveDate) -> f64 {
    let top = PAGE_HEIGHT - MARGIN_TOP;
    let height = 64.0;
    let left = MARGIN_X;
    let usable = PAGE_WIDTH - 2.0 * MARGIN_X;

    // Cell split mirrors the original: identity / title / date.
    let w_left = usable * 5.0 / 17.0;
    let w_center = usable * 9.0 / 17.0;

    page.stroke_rect(left, top - height, usable, height, red(), 2.0);
    page.line(left + w_left, top - height, left + w_left, top, red(), 1.0);
    page.line(
        left + w_left + w_center,
        top - height,
        left + w_left + w_center,
        top,
        red(),
        1.0,
    );

    // Textual institution badge; the layout never depends on an image
    // asset, so header assembly cannot fail.
    let badge_x = left + 10.0;
    let badge_y = top - 26.0;
    page.fill_rect(badge_x, badge_y, 58.0, 16.0, red());
    page.text_centered(
        badge_x + 29.0,
        badge_y + 4.5,
        Font::HelveticaBold,
        11.0,
        Color::WHITE,
        INSTITUTION_BADGE,
    );
    page.text(badge_x, badge_y - 12.0, Font::Helvetica, 6.5, Color::BLACK, "National Service for");
    page.text(badge_x, badge_y - 20.0, Font::Helvetica, 6.5, Color::BLACK, "Industrial Training");

    let center_x = left + w_left + w_center / 2.0;
    page.text_centered(center_x, top - 24.0, Font::HelveticaBold, 14.0, Color::BLACK, DOCUMENT_TITLE);
    page.text_centered(center_x, top - 38.0, Font::Helvetica, 10.0, Color::BLACK, INSTITUTION_NAME);
    page.text_centered(center_x, top - 50.0, Font::Helvetica, 7.0, Color::BLACK, SYSTEM_LINE);

    let date_x = left + w_left + w_center + 10.0;
    page.text(date_x, top - 26.0, Font::HelveticaBold, 9.0, Color::BLACK, "Date:");
    page.text(
        date_x,
        top - 38.0,
        Font::Helvetica,
        9.0,
        Color::BLACK,
        &issue_date.format("%d/%m/%Y").to_string(),
    );

    top - height
}

fn draw_student_block(page: &mut Page, student: &BulletinStudent, issue_date: NaiveDate, top: f64) -> f64 {
    let row_h = 22.0;
    let label_w = 144.0;
    let value_w = 288.0;
    let left = MARGIN_X;

    let issued = issue_date.format("%d/%m/%Y").to_string();
    let rows = [
        ("Student name:", student.name.as_str()),
        ("Registration number:", student.registration_number.as_str()),
        ("Course:", student.course.as_str()),
        ("Issue date:", issued.as_str()),
    ];

    let mut y = top;
    for (label, value) in rows {
        page.stroke_rect(left, y - row_h, label_w, row_h, grid_grey(), 1.0);
        page.stroke_rect(left + label_w, y - row_h, value_w, row_h, grid_grey(), 1.0);
        let baseline = y - row_h + (row_h - 10.0) / 2.0 + 1.5;
        page.text_right(left + label_w - 6.0, baseline, Font::HelveticaBold, 10.0, Color::BLACK, label);
        page.text(left + label_w + 6.0, baseline, Font::Helvetica, 10.0, Color::BLACK, value);
        y -= row_h;
    }
    y
}

fn draw_legend(page: &mut Page, top: f64) -> f64 {
    let leading = 13.0;
    let mut y = top;
    let lines: [(&str, Font); 8] = [
        ("LEGEND:", Font::HelveticaBold),
        (
            "- Approved: final grade >= 50 (mean of the three scores) and absences <= 25% of the workload",
            Font::Helvetica,
        ),
        (
            "- Failed: final grade < 50 or absences > 25% of the workload",
            Font::Helvetica,
        ),
        ("- Pending: waiting for the three partial scores", Font::Helvetica),
        ("", Font::Helvetica),
        ("NOTES:", Font::HelveticaBold),
        ("- Final grade = (score 1 + score 2 + score 3) / 3", Font::Helvetica),
        (
            "- The absence percentage is computed over the subject's total workload",
            Font::Helvetica,
        ),
    ];
    for (line, font) in lines {
        if !line.is_empty() {
            page.text(MARGIN_X, y, font, 9.5, Color::BLACK, line);
        }
        y -= leading;
    }
    y
}

fn draw_footer(page: &mut Page, top: f64) {
    let usable = PAGE_WIDTH - 2.0 * MARGIN_X;
    let line_len = 180.0;
    let captions = ["Responsible party signature", "Institution stamp"];
    for (i, caption) in captions.iter().enumerate() {
        let center = MARGIN_X + usable * (0.25 + 0.5 * i as f64);
        page.line(
            center - line_len / 2.0,
            top,
            center + line_len / 2.0,
            top,
            Color::BLACK,
            0.8,
        );
        page.text_centered(center, top - 12.0, Font::Helvetica, 9.0, Color::BLACK, caption);
    }
}

fn table_header_cells() -> [String; 8] {
    COLUMN_TITLES.map(str::to_string)
}

fn table_row_cells(grade: &BulletinGrade, evaluation: &Evaluation) -> [String; 8] {
    [
        grade.subject.name.clone(),
        grade
            .subject
            .teacher_name
            .clone()
            .unwrap_or_else(|| "-".to_string()),
        fmt_score(grade.grade_1),
        fmt_score(grade.grade_2),
        fmt_score(grade.grade_3),
        fmt_score(evaluation.final_grade),
        format!("{} ({:.0}%)", grade.absences, evaluation.absence_percentage),
        status_label(evaluation),
    ]
}

pub fn render_bulletin(
    student: &BulletinStudent,
    grades: &[BulletinGrade],
    issue_date: NaiveDate,
) -> Vec<u8> {
    let mut doc = Document::new();
    let page = doc.new_page();

    let mut y = draw_header_block(page, issue_date);
    y -= 20.0;
    y = draw_student_block(page, student, issue_date, y);
    y -= 20.0;
    page.text(MARGIN_X, y, Font::HelveticaBold, 12.0, red(), "GRADES AND ATTENDANCE");
    y -= 10.0;

    draw_table_row(page, y, HEADER_ROW_H, &table_header_cells(), red(), true);
    y -= HEADER_ROW_H;

    for (i, grade) in grades.iter().enumerate() {
        if y - DATA_ROW_H < MARGIN_BOTTOM {
            let page = doc.new_page();
            y = PAGE_HEIGHT - MARGIN_TOP;
            draw_table_row(page, y, HEADER_ROW_H, &table_header_cells(), red(), true);
            y -= HEADER_ROW_H;
        }
        let evaluation = grade.evaluate();
        let fill = if evaluation.status == GradeStatus::Approved {
            approved_green()
        } else if i % 2 == 0 {
            Color::WHITE
        } else {
            stripe_grey()
        };
        let cells = table_row_cells(grade, &evaluation);
        draw_table_row(doc.current_page(), y, DATA_ROW_H, &cells, fill, false);
        y -= DATA_ROW_H;
    }

    // Legend plus footer are kept together on one page.
    let trailer_height = 30.0 + 8.0 * 13.0 + 30.0 + 24.0;
    if y - trailer_height < MARGIN_BOTTOM {
        doc.new_page();
        y = PAGE_HEIGHT - MARGIN_TOP;
    }
    y -= 30.0;
    y = draw_legend(doc.current_page(), y);
    y -= 30.0;
    draw_footer(doc.current_page(), y);

    doc.finish()
}
