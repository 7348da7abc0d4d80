use badges::{next_window, Address, CommittedWindow, RawBadgeAward};

fn award(n: u64) -> RawBadgeAward {
    RawBadgeAward {
        winner: Address([(n % 251) as u8 + 1; 20]).to_hex(),
        badge_definition_number: (n % 16) as i64,
        global_badge_number: n,
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Badge Checkpoint Demo ===\n");

    let ledger: Vec<RawBadgeAward> = (0..1000).map(award).collect();

    // 1. Contiguous windows over the ledger
    println!("--- Windows ---");
    let mut last = None;
    let mut windows = Vec::new();
    for size in [400, 350, 400] {
        let w = next_window(last.as_ref(), size)?;
        let end = (w.end() as usize).min(ledger.len());
        let committed = CommittedWindow::build(w, &ledger[w.starting_index as usize..end])?;
        println!(
            "  {} -> root 0x{} ({} leaves, depth {})",
            committed.window(),
            hex::encode(committed.root()),
            committed.len(),
            committed.tree().depth()
        );
        last = Some(committed.window());
        windows.push(committed);
    }

    // 2. Proof for one award
    println!("\n--- Proof ---");
    let second = &windows[1];
    let claim = second.claim(123)?;
    println!("Ledger #{}: winner {} definition {}", claim.ledger_index, claim.record.winner, claim.record.badge_definition_number);
    println!("Leaf:      0x{}", hex::encode(claim.leaf));
    println!("Siblings:  {}", claim.siblings().len());
    println!("Positions: {:?}", claim.positions());

    // 3. Verification
    println!("\n--- Verification ---");
    println!("Against its window root:   {}", if claim.verify(second.root()) { "OK" } else { "FAIL" });
    println!("Against another window:    {}", if claim.verify(windows[0].root()) { "OK (BAD!)" } else { "rejected (good)" });

    // 4. Tamper resistance
    println!("\n--- Tamper Resistance ---");
    let mut forged = claim.clone();
    forged.record.badge_definition_number = forged.record.badge_definition_number.wrapping_add(1);
    forged.leaf = badges::leaf::leaf_hash(&forged.record);
    println!("Forged definition number:  {}", if forged.verify(second.root()) { "OK (BAD!)" } else { "rejected (good)" });

    Ok(())
}
