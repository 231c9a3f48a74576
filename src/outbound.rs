use crate::models::Rfp;

/// Renders the plain-text solicitation email for an RFP. Delivery is out of
/// scope; `tender rfp send` prints this body for the operator's mail setup.
pub fn render_rfp_email(rfp: &Rfp) -> String {
    let mut text = String::from("REQUEST FOR PROPOSAL\n\n");
    text.push_str(&rfp.title);
    text.push_str("\n\n");
    text.push_str(&rfp.description);
    text.push_str("\n\n");

    if let Some(budget) = rfp.budget {
        text.push_str(&format!("Budget: ${budget:.2}\n"));
    }
    if let Some(deadline) = &rfp.deadline {
        text.push_str(&format!("Deadline: {deadline}\n"));
    }

    if !rfp.requirements.is_empty() {
        text.push_str("\nRequirements:\n");
        for req in &rfp.requirements {
            match req.quantity {
                Some(qty) => text.push_str(&format!("- {} (Quantity: {qty})\n", req.item)),
                None => text.push_str(&format!("- {} (Quantity: N/A)\n", req.item)),
            }
            for (key, value) in &req.specifications {
                text.push_str(&format!("  {key}: {value}\n"));
            }
        }
    }

    if let Some(terms) = &rfp.payment_terms {
        text.push_str(&format!("\nPayment Terms: {terms}\n"));
    }
    if let Some(warranty) = &rfp.warranty {
        text.push_str(&format!("Warranty Requirements: {warranty}\n"));
    }

    text.push_str(
        "\nPlease reply to this email with your proposal including:\n\
         - Itemized pricing\n\
         - Delivery timeline\n\
         - Payment terms\n\
         - Warranty information\n\
         - Any additional terms or conditions\n",
    );

    text
}

/// Subject line vendors will reply to; the resolver matches on the title.
pub fn rfp_email_subject(rfp: &Rfp) -> String {
    format!("RFP: {}", rfp.title)
}
