use crate::Detection;

fn corners(d: &Detection) -> (f32, f32, f32, f32) {
    (d.cx - d.w / 2.0, d.cy - d.h / 2.0, d.cx + d.w / 2.0, d.cy + d.h / 2.0)
}

pub fn iou(a: &Detection, b: &Detection) -> f32 {
    let (ax0, ay0, ax1, ay1) = corners(a);
    let (bx0, by0, bx1, by1) = corners(b);

    let iw = (ax1.min(bx1) - ax0.max(bx0)).max(0.0);
    let ih = (ay1.min(by1) - ay0.max(by0)).max(0.0);
    let inter = iw * ih;
    let union = a.w.max(0.0) * a.h.max(0.0) + b.w.max(0.0) * b.h.max(0.0) - inter;
    if union <= 0.0 { 0.0 } else { inter / union }
}
